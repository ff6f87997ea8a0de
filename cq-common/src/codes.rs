//! Anonymous access code primitives
//!
//! Codes are 8 characters drawn from a restricted alphabet that excludes
//! characters easily confused when spoken or read aloud (0/O, 1/I/L). They
//! identify a progression session without any personal data and are stored
//! only as a one-way SHA-256 hash.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Code length in characters
pub const CODE_LENGTH: usize = 8;

/// Unambiguous alphabet: no 0/O, no 1/I/L
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Generate a random candidate code.
///
/// Uniqueness against the active-code index is the caller's responsibility;
/// this function only guarantees alphabet and length.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize user input: trim whitespace, uppercase.
///
/// Lowercase entry is accepted since codes are often read over the phone.
pub fn normalize_code(input: &str) -> Result<String> {
    let code: String = input.trim().to_ascii_uppercase();
    if code.len() != CODE_LENGTH {
        return Err(Error::InvalidCode);
    }
    if !code.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
        return Err(Error::InvalidCode);
    }
    Ok(code)
}

/// One-way hash of a normalized code (SHA-256 hex)
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_excludes_confusable_characters() {
        for c in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!CODE_ALPHABET.contains(&c), "{} should be excluded", c as char);
        }
    }

    #[test]
    fn generated_codes_are_well_formed() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn normalization_accepts_lowercase_and_whitespace() {
        assert_eq!(normalize_code(" ab3dfj9q ").unwrap(), "AB3DFJ9Q");
        assert_eq!(normalize_code("AB3DFJ9Q").unwrap(), "AB3DFJ9Q");
    }

    #[test]
    fn normalization_rejects_bad_input() {
        assert!(normalize_code("SHORT").is_err());
        assert!(normalize_code("AB3DFJ9QX").is_err());
        // Contains excluded characters
        assert!(normalize_code("AB0DFJ9Q").is_err());
        assert!(normalize_code("AB3DFJ1Q").is_err());
    }

    #[test]
    fn hash_is_stable_and_never_reveals_code() {
        let hash = hash_code("AB3DFJ9Q");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_code("AB3DFJ9Q"));
        assert_ne!(hash, hash_code("AB3DFJ9R"));
        assert!(!hash.contains("AB3DFJ9Q"));
    }
}
