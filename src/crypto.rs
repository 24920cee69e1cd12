//! `WebAuthn` cryptography helpers
//!
//! Random challenge generation, digests and the base64url boundary encoding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest;
use ring::rand::SecureRandom;
use sha2::{Digest, Sha384, Sha512};

use crate::error::WebAuthnError;

/// Minimum challenge length accepted from callers (128 bits)
pub const MIN_CHALLENGE_LEN: usize = 16;

/// Length of challenges and user handles generated here (256 bits)
pub const GENERATED_CHALLENGE_LEN: usize = 32;

/// Fill a fresh buffer with `len` bytes from the system CSPRNG
///
/// # Errors
/// Returns `ConfigurationError` if the system random source fails
pub fn random_bytes(len: usize) -> Result<Vec<u8>, WebAuthnError> {
    let mut bytes = vec![0u8; len];
    ring::rand::SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| WebAuthnError::ConfigurationError("System random source failed".into()))?;
    Ok(bytes)
}

/// Generate a secure random challenge
///
/// # Errors
/// Returns `ConfigurationError` if the system random source fails
pub fn generate_challenge() -> Result<Vec<u8>, WebAuthnError> {
    random_bytes(GENERATED_CHALLENGE_LEN)
}

/// Generate a random user handle for a new account
///
/// # Errors
/// Returns `ConfigurationError` if the system random source fails
pub fn generate_user_handle() -> Result<Vec<u8>, WebAuthnError> {
    random_bytes(GENERATED_CHALLENGE_LEN)
}

/// Hash data using SHA-256
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

/// Hash data using SHA-384
#[must_use]
pub fn sha384(data: &[u8]) -> Vec<u8> {
    Sha384::digest(data).to_vec()
}

/// Hash data using SHA-512
#[must_use]
pub fn sha512(data: &[u8]) -> Vec<u8> {
    Sha512::digest(data).to_vec()
}

/// SHA-256 over the concatenation of two byte strings
#[must_use]
pub fn sha256_concat(first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(first);
    ctx.update(second);
    ctx.finish().as_ref().to_vec()
}

/// Encode bytes as unpadded base64url
#[must_use]
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url, tolerating trailing `=` padding
///
/// # Errors
/// Returns `MalformedEncoding` naming `field` when the input is not base64url
pub fn base64url_decode(value: &str, field: &str) -> Result<Vec<u8>, WebAuthnError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| WebAuthnError::malformed(format!("Invalid base64url in {field}")))
}

/// Constant-time comparison for challenge and hash checks
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_challenge_is_random() {
        let a = generate_challenge().expect("random");
        let b = generate_challenge().expect("random");
        assert_eq!(a.len(), GENERATED_CHALLENGE_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sha256_concat_matches_single_digest() {
        let joined = [b"auth".as_slice(), b"data".as_slice()].concat();
        assert_eq!(sha256_concat(b"auth", b"data"), sha256(&joined));
    }

    #[test]
    fn test_base64url_decode_accepts_padding() {
        assert_eq!(base64url_decode("YQ==", "x").expect("decode"), b"a");
        assert_eq!(base64url_decode("YQ", "x").expect("decode"), b"a");
        assert!(base64url_decode("***", "x").is_err());
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(sha384(b"x").len(), 48);
        assert_eq!(sha512(b"x").len(), 64);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
