//! C1: symmetric and asymmetric cipher layer.
//!
//! Two framings on decrypt, distinguished by the leading byte (spec §4.1):
//! `!iv|ct` (CBC, base64 parts) when the ciphertext starts with `!`, raw
//! ECB otherwise. Encryption always produces the CBC framing with a fresh
//! random IV. Both framings tolerate a failed PKCS#7 unpad by returning
//! the raw decrypted bytes instead of erroring — legacy vault data relies
//! on this.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::error::{LpError, LpResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256EcbDec = ecb::Decryptor<Aes256>;

pub const KEY_LEN: usize = 32;
pub const BLOCK_LEN: usize = 16;

/// Decrypt raw ciphertext bytes with either framing, per spec §4.1.
/// Empty input decrypts to empty output (LastPass convention: an unset
/// field is stored as an empty string, never as a ciphertext of "").
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_LEN]) -> LpResult<Vec<u8>> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }

    if ciphertext[0] == b'!' {
        decrypt_cbc_framed(&ciphertext[1..], key)
    } else {
        decrypt_ecb(ciphertext, key)
    }
}

/// Decrypt a base64-wrapped framed blob: the entire CBC/ECB framed byte
/// string was itself base64-encoded for transport.
pub fn decrypt_base64(ciphertext_b64: &[u8], key: &[u8; KEY_LEN]) -> LpResult<Vec<u8>> {
    if ciphertext_b64.is_empty() {
        return Ok(Vec::new());
    }
    let raw = B64
        .decode(ciphertext_b64)
        .map_err(|e| LpError::decryption(format!("invalid base64 envelope: {e}")))?;
    decrypt(&raw, key)
}

/// Convenience wrapper matching the original's `decrypt_aes256_cbc_base64`:
/// lossily decodes the plaintext as UTF-8. Per spec §9's Open Questions,
/// this must NEVER be used on binary payloads (attachment bodies) —
/// callers handling attachments must use [`decrypt_base64`] directly and
/// keep the raw bytes.
pub fn decrypt_base64_to_string(ciphertext_b64: &str, key: &[u8; KEY_LEN]) -> LpResult<String> {
    let bytes = decrypt_base64(ciphertext_b64.as_bytes(), key)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn decrypt_cbc_framed(rest: &[u8], key: &[u8; KEY_LEN]) -> LpResult<Vec<u8>> {
    let pipe = rest
        .iter()
        .position(|&b| b == b'|')
        .ok_or_else(|| LpError::decryption("missing '|' separator in CBC envelope"))?;
    let (iv_b64, ct_b64) = (&rest[..pipe], &rest[pipe + 1..]);

    let iv = B64
        .decode(iv_b64)
        .map_err(|e| LpError::decryption(format!("invalid IV base64: {e}")))?;
    if iv.len() != BLOCK_LEN {
        return Err(LpError::decryption(format!("IV must be {BLOCK_LEN} bytes, got {}", iv.len())));
    }
    let ct = B64
        .decode(ct_b64)
        .map_err(|e| LpError::decryption(format!("invalid ciphertext base64: {e}")))?;

    decrypt_cbc_raw(&ct, key, &iv)
}

fn decrypt_cbc_raw(ct: &[u8], key: &[u8; KEY_LEN], iv: &[u8]) -> LpResult<Vec<u8>> {
    if ct.is_empty() {
        return Ok(Vec::new());
    }
    if ct.len() % BLOCK_LEN != 0 {
        return Err(LpError::decryption("ciphertext is not a multiple of the block size"));
    }
    let mut buf = ct.to_vec();
    let dec = Aes256CbcDec::new(key.into(), iv.into());
    // Try a strict PKCS#7 unpad first; fall back to the raw decrypted
    // bytes on padding failure (spec §4.1: tolerate legacy data).
    match dec.clone().decrypt_padded_mut::<Pkcs7>(&mut buf) {
        Ok(plain) => Ok(plain.to_vec()),
        Err(_) => Ok(decrypt_blocks_raw(dec, ct)),
    }
}

fn decrypt_ecb(ct: &[u8], key: &[u8; KEY_LEN]) -> LpResult<Vec<u8>> {
    if ct.len() % BLOCK_LEN != 0 {
        return Err(LpError::decryption("ciphertext is not a multiple of the block size"));
    }
    let mut buf = ct.to_vec();
    let dec = Aes256EcbDec::new(key.into());
    match dec.clone().decrypt_padded_mut::<Pkcs7>(&mut buf) {
        Ok(plain) => Ok(plain.to_vec()),
        Err(_) => Ok(decrypt_blocks_raw(dec, ct)),
    }
}

/// Decrypt block-by-block with no padding removal, used as the fallback
/// when PKCS#7 unpadding rejects the plaintext (spec §4.1: legacy data
/// tolerance — return the raw decrypted bytes rather than erroring).
fn decrypt_blocks_raw<D: BlockDecryptMut>(mut dec: D, ct: &[u8]) -> Vec<u8> {
    use aes::cipher::generic_array::GenericArray;
    let mut out = ct.to_vec();
    for chunk in out.chunks_exact_mut(BLOCK_LEN) {
        let block = GenericArray::from_mut_slice(chunk);
        dec.decrypt_block_mut(block);
    }
    out
}

/// Encrypt plaintext with AES-256-CBC, PKCS#7 padding, and a fresh random
/// IV. Always returns the `!base64(iv)|base64(ct)` framing (spec §4.1).
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Vec<u8> {
    if plaintext.is_empty() {
        return Vec::new();
    }

    let mut iv = [0u8; BLOCK_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let ct = encrypt_cbc_raw(plaintext, key, &iv);

    let mut out = Vec::with_capacity(1 + 24 + 1 + ct.len() * 4 / 3 + 4);
    out.push(b'!');
    out.extend_from_slice(B64.encode(iv).as_bytes());
    out.push(b'|');
    out.extend_from_slice(B64.encode(&ct).as_bytes());
    out
}

/// Encrypt and wrap the whole CBC-framed blob in base64, matching the
/// original's `encrypt_aes256_cbc_base64`.
pub fn encrypt_base64(plaintext: &str, key: &[u8; KEY_LEN]) -> String {
    let framed = encrypt(plaintext.as_bytes(), key);
    B64.encode(framed)
}

fn encrypt_cbc_raw(plaintext: &[u8], key: &[u8; KEY_LEN], iv: &[u8; BLOCK_LEN]) -> Vec<u8> {
    let enc = Aes256CbcEnc::new(key.into(), iv.into());
    enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// RSA-OAEP (SHA-1/MGF1) decrypt of a per-share AES key, consuming a
/// PEM-encoded private key (spec §4.1/§4.3 `sharekey`).
pub fn rsa_decrypt(ciphertext: &[u8], private_key_pem: &str) -> LpResult<Vec<u8>> {
    let key = load_rsa_private_key(private_key_pem)?;
    let padding = Oaep::new::<Sha1>();
    key.decrypt(padding, ciphertext)
        .map_err(|e| LpError::decryption(format!("RSA-OAEP decryption failed: {e}")))
}

fn load_rsa_private_key(pem: &str) -> LpResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| LpError::decryption(format!("invalid RSA private key PEM: {e}")))
}

/// RSA-OAEP (SHA-1/MGF1) encrypt a share key under an invited member's
/// public key (spec §4.7's share `add-user`: "the share's sharekey is
/// RSA-encrypted under the invited user's public key").
pub fn rsa_encrypt_for_public_key(plaintext: &[u8], public_key_pem: &str) -> LpResult<Vec<u8>> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| LpError::decryption(format!("invalid RSA public key PEM: {e}")))?;
    let mut rng = rand::rngs::OsRng;
    let padding = Oaep::new::<Sha1>();
    key.encrypt(&mut rng, padding, plaintext)
        .map_err(|e| LpError::decryption(format!("RSA-OAEP encryption failed: {e}")))
}

/// Decrypt the hex-encoded, vault-key-wrapped RSA private key obtained at
/// login (`privatekeyenc`), yielding the PEM text (spec §4.6 step 5).
pub fn decrypt_private_key(key_hex: &str, decryption_key: &[u8; KEY_LEN]) -> LpResult<String> {
    let encrypted = hex::decode(key_hex).map_err(|e| LpError::decryption(format!("invalid hex: {e}")))?;
    let decrypted = decrypt(&encrypted, decryption_key)?;
    String::from_utf8(decrypted).map_err(|e| LpError::decryption(format!("private key is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn cbc_round_trip_various_lengths() {
        let key = key_of(0x42);
        for len in [0usize, 1, 15, 16, 17, 1000, 4096] {
            let pt: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ct = encrypt(&pt, &key);
            let back = decrypt(&ct, &key).unwrap();
            assert_eq!(back, pt, "len={len}");
        }
    }

    #[test]
    fn cbc_envelope_starts_with_bang() {
        let key = key_of(7);
        let ct = encrypt(b"All your base", &key);
        assert_eq!(ct[0], b'!');
        assert!(ct.contains(&b'|'));
    }

    #[test]
    fn s2_fixture_envelope_decrypts() {
        // spec §8 S2: key = 32 zero bytes, IV = 16 bytes of 0x01.
        let key = [0u8; KEY_LEN];
        let iv = [1u8; BLOCK_LEN];
        let ct = encrypt_cbc_raw(b"All your base", &key, &iv);
        let framed = format!(
            "!{}|{}",
            B64.encode(iv),
            B64.encode(&ct)
        );
        let back = decrypt(framed.as_bytes(), &key).unwrap();
        assert_eq!(back, b"All your base");
    }

    #[test]
    fn ecb_framing_requires_block_multiple() {
        let key = key_of(3);
        // 15 bytes: not a multiple of the block size, no '!' prefix.
        let bad = vec![0u8; 15];
        assert!(decrypt(&bad, &key).is_err());

        // 32 bytes (two blocks of garbage): decrypts, though plaintext is meaningless.
        let garbage = vec![0xAAu8; 32];
        assert!(decrypt(&garbage, &key).is_ok());
    }

    #[test]
    fn unpad_failure_returns_raw_bytes_not_error() {
        let key = key_of(9);
        let iv = [5u8; BLOCK_LEN];
        // Encrypt one block of data whose padding is invalid once decrypted
        // raw: build ciphertext directly without going through our pad step
        // by encrypting 16 bytes of zero (no PKCS7 applied beforehand via
        // encrypt_cbc_raw, since pad() is applied inside encrypt_padded_vec_mut
        // for arbitrary-length input). We construct a deliberately "wrong"
        // single ECB block so that un-padding will fail.
        let ct = encrypt_cbc_raw(&[0u8; 16], &key, &iv); // produces 32 bytes (16 data + 16 pad block)
        // Truncate to just the first ciphertext block: its padding byte
        // pattern, once decrypted, will not be a valid PKCS#7 trailer.
        let truncated = &ct[..16];
        let framed = format!("!{}|{}", B64.encode(iv), B64.encode(truncated));
        let result = decrypt(framed.as_bytes(), &key);
        assert!(result.is_ok(), "invalid padding must not be fatal");
    }

    #[test]
    fn empty_ciphertext_round_trips_to_empty() {
        let key = key_of(1);
        assert_eq!(decrypt(b"", &key).unwrap(), Vec::<u8>::new());
        assert_eq!(encrypt(b"", &key), Vec::<u8>::new());
    }

    #[test]
    fn base64_outer_variant_round_trips() {
        let key = key_of(11);
        let wrapped = encrypt_base64("hello world", &key);
        let back = decrypt_base64_to_string(&wrapped, &key).unwrap();
        assert_eq!(back, "hello world");
    }
}
