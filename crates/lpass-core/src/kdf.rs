//! C2: key derivation. Turns (username, master password, iteration count)
//! into the 32-byte vault (decryption) key and the 32-byte login key
//! (spec §4.2).

use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::{Digest, Sha256};

use crate::cipher::KEY_LEN;

pub type Key = [u8; KEY_LEN];

/// Both derived keys for a login attempt.
#[derive(Clone)]
pub struct DerivedKeys {
    pub login_key: Key,
    pub decryption_key: Key,
}

/// Derive both keys for the given iteration count. `iterations == 1`
/// takes the legacy SHA-256 path; `iterations > 1` takes the PBKDF2
/// path. Callers (session/auth, spec §4.6) reject `iterations < 2`
/// except the documented `== 1` legacy branch before calling this.
pub fn derive_keys(username: &str, password: &str, iterations: u32) -> DerivedKeys {
    if iterations == 1 {
        derive_keys_legacy(username, password)
    } else {
        derive_keys_pbkdf2(username, password, iterations)
    }
}

fn derive_keys_legacy(username: &str, password: &str) -> DerivedKeys {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    let decryption_key: Key = hasher.finalize().into();

    let mut hasher = Sha256::new();
    hasher.update(hex::encode(decryption_key).as_bytes());
    hasher.update(password.as_bytes());
    let login_key: Key = hasher.finalize().into();

    DerivedKeys { login_key, decryption_key }
}

fn derive_keys_pbkdf2(username: &str, password: &str, iterations: u32) -> DerivedKeys {
    let mut decryption_key: Key = [0u8; KEY_LEN];
    pbkdf2::<Hmac<Sha256>>(
        password.as_bytes(),
        username.as_bytes(),
        iterations,
        &mut decryption_key,
    )
    .expect("PBKDF2-HMAC-SHA256 output length is valid");

    let mut login_key: Key = [0u8; KEY_LEN];
    pbkdf2::<Hmac<Sha256>>(&decryption_key, password.as_bytes(), 1, &mut login_key)
        .expect("PBKDF2-HMAC-SHA256 output length is valid");

    DerivedKeys { login_key, decryption_key }
}

/// Hex-encode the login key in lowercase for transmission (spec §4.2).
pub fn login_hash_hex(keys: &DerivedKeys) -> String {
    hex::encode(keys.login_key)
}
