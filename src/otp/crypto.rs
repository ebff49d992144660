//! Code, token, and password primitives.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::Engine;
use rand::{rngs::OsRng, Rng, RngCore};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate a numeric code of `length` digits.
///
/// Leading zeros are kept, so every digit is uniform over `0..=9`.
#[must_use]
pub fn generate_code(length: usize) -> SecretString {
    let mut rng = OsRng;
    let code: String = (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    SecretString::from(code)
}

/// Digest a code bound to its subject so equal codes differ across subjects.
#[must_use]
pub fn hash_code(subject_id: &str, code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.trim().as_bytes());
    hasher.finalize().to_vec()
}

/// Constant-time digest comparison.
#[must_use]
pub fn digests_match(expected: &[u8], submitted: &[u8]) -> bool {
    expected.ct_eq(submitted).into()
}

/// Create a single-use password reset token; only its hash is stored.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[must_use]
pub fn hash_reset_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a new account password with Argon2id (PHC string format).
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Check a password against a stored PHC string.
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("password verification failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use secrecy::ExposeSecret;

    #[test]
    fn generated_codes_are_numeric_with_requested_length() {
        for length in [4, 6, 10] {
            let code = generate_code(length);
            assert_eq!(code.expose_secret().len(), length);
            assert!(code.expose_secret().chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_hash_is_bound_to_subject() {
        let first = hash_code("item-a", "483920");
        assert_eq!(first, hash_code("item-a", " 483920 "));
        assert_ne!(first, hash_code("item-b", "483920"));
        assert_ne!(first, hash_code("item-a", "483921"));
    }

    #[test]
    fn digests_match_requires_equal_length_and_bytes() {
        let digest = hash_code("item-a", "483920");
        assert!(digests_match(&digest, &digest));
        assert!(!digests_match(&digest, &hash_code("item-a", "000000")));
        assert!(!digests_match(&digest, &digest[..16]));
    }

    #[test]
    fn reset_token_decodes_to_32_bytes() {
        let decoded_len = generate_reset_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn reset_token_hash_stable() {
        assert_eq!(hash_reset_token("token"), hash_reset_token("token"));
        assert_ne!(hash_reset_token("token"), hash_reset_token("other"));
    }

    #[test]
    fn password_hash_verifies() -> Result<()> {
        let stored = hash_password("correct horse battery")?;
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &stored)?);
        assert!(!verify_password("wrong horse", &stored)?);
        Ok(())
    }

    #[test]
    fn verify_password_rejects_garbage_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }
}
