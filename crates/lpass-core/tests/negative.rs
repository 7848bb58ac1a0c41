//! Malformed-input and tamper cases, mirroring the teacher's
//! `tests/neg_v2.rs` (AAD tamper / nonce-reuse checks) but over this
//! crate's own wire formats: bad blob framing, wrong decryption key,
//! and a queue entry too corrupt to decrypt.

use std::collections::BTreeMap;

use lpass_core::blob;
use lpass_core::cipher;
use lpass_core::config::Environment;
use lpass_core::queue::{self, Operation};

#[test]
fn decrypting_with_the_wrong_key_does_not_panic() {
    let right_key = [1u8; 32];
    let wrong_key = [2u8; 32];
    let ct = cipher::encrypt(b"hello", &right_key);

    // Decrypting under the wrong key never panics; it either yields
    // garbage (ECB/no-padding-error path) or a decryption error.
    let _ = cipher::decrypt(&ct, &wrong_key);
}

#[test]
fn truncated_cbc_envelope_is_rejected() {
    let key = [3u8; 32];
    let ct = cipher::encrypt(b"All your base", &key);
    let truncated = &ct[..ct.len() - 5];
    assert!(cipher::decrypt(truncated, &key).is_err());
}

#[test]
fn blob_with_a_truncated_chunk_header_fails_to_parse() {
    let vault_key = [4u8; 32];
    // A chunk tag with a length field claiming far more payload than
    // actually follows.
    let mut data = Vec::new();
    data.extend_from_slice(b"ACCT");
    data.extend_from_slice(&9999u32.to_be_bytes());
    data.extend_from_slice(b"short");

    let result = blob::parse(&data, &vault_key, None, &Default::default());
    assert!(result.is_err());
}

#[test]
fn blob_with_unknown_leading_bytes_fails_to_parse() {
    let vault_key = [5u8; 32];
    let garbage = vec![0xFFu8; 16];
    assert!(blob::parse(&garbage, &vault_key, None, &Default::default()).is_err());
}

#[test]
fn queue_entry_corrupted_after_enqueue_is_moved_to_failed() {
    use lpass_core::{LpResult, Transport, TransportResponse};
    use std::time::Duration;

    struct UnreachableTransport;
    impl Transport for UnreachableTransport {
        fn post(&self, _endpoint: &str, _params: &[(&str, &str)]) -> LpResult<TransportResponse> {
            Ok(TransportResponse { status: 200, body: Vec::new() })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let env = Environment::for_test(dir.path());
    let key = [6u8; 32];

    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), "x".to_string());
    let path = queue::enqueue(&env, &key, Operation::AddAccount { fields }).unwrap();

    // Corrupt the on-disk entry after the fact.
    std::fs::write(&path, b"not a valid encrypted entry").unwrap();

    let transport = UnreachableTransport;
    let processed = queue::drain(&env, &key, &transport, Duration::ZERO).unwrap();
    assert_eq!(processed, 0);

    let failed: Vec<_> = std::fs::read_dir(env.queue_failed_dir()).unwrap().collect();
    assert_eq!(failed.len(), 1);
}

#[test]
fn queue_drain_wrong_key_cannot_decrypt_and_fails_the_entry() {
    use lpass_core::{LpResult, Transport, TransportResponse};
    use std::time::Duration;

    struct UnreachableTransport;
    impl Transport for UnreachableTransport {
        fn post(&self, _endpoint: &str, _params: &[(&str, &str)]) -> LpResult<TransportResponse> {
            Ok(TransportResponse { status: 200, body: Vec::new() })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let env = Environment::for_test(dir.path());
    let right_key = [7u8; 32];
    let wrong_key = [8u8; 32];

    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), "x".to_string());
    queue::enqueue(&env, &right_key, Operation::AddAccount { fields }).unwrap();

    let transport = UnreachableTransport;
    let processed = queue::drain(&env, &wrong_key, &transport, Duration::ZERO).unwrap();
    assert_eq!(processed, 0);
}
