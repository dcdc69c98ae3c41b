//! Password hashing primitive pair.
//!
//! Stored form is `salt$hex(sha256(password + salt))` with a random
//! 16-character alphanumeric salt. Verification recomputes the digest
//! from the stored salt; a malformed stored value never verifies.

use rand::Rng;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;
const SALT_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut rng = rand::thread_rng();
    let salt: String = (0..SALT_LEN)
        .map(|_| SALT_CHARSET[rng.gen_range(0..SALT_CHARSET.len())] as char)
        .collect();
    let digest = digest_hex(password, &salt);
    format!("{salt}${digest}")
}

/// Verify a password against a stored `salt$hash` value.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, hash)) = stored.split_once('$') else {
        return false;
    };
    digest_hex(password, salt) == hash
}

fn digest_hex(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies() {
        let stored = hash_password("pw1");
        assert!(verify_password("pw1", &stored));
        assert!(!verify_password("pw2", &stored));
    }

    #[test]
    fn stored_form_is_salt_dollar_hex() {
        let stored = hash_password("pw1");
        let (salt, hash) = stored.split_once('$').unwrap();
        assert_eq!(salt.len(), SALT_LEN);
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("pw1"), hash_password("pw1"));
    }

    #[test]
    fn malformed_stored_value_never_verifies() {
        assert!(!verify_password("pw1", ""));
        assert!(!verify_password("pw1", "no-dollar-separator"));
    }
}
