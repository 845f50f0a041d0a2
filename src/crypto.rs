//! Token generation, secret hashing and password derivation.
//!
//! Every identifier, session secret and one-time token in the service comes
//! from [`generate_secure_token`]. Raw secrets are never stored: callers
//! persist [`hash_secret`] output and compare with [`constant_time_eq`].

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// 32 symbols without the look-alikes `l`, `o`, `0` and `1`.
pub const TOKEN_ALPHABET: &[u8; 32] = b"abcdefghijkmnpqrstuvwxyz23456789";
/// 24 symbols of 5 bits each: 120 bits of entropy.
pub const TOKEN_LENGTH: usize = 24;
pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LENGTH: usize = 16;
const DERIVED_KEY_LENGTH: usize = 32;

/// Stored form of a password: base64 PBKDF2 output and base64 salt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
}

/// Create a random token for ids, secrets and one-time links.
///
/// Each byte of OS randomness contributes its top 5 bits, which index the
/// 32-symbol alphabet without modulo bias.
pub fn generate_secure_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate secure token")?;
    Ok(bytes
        .iter()
        .map(|byte| char::from(TOKEN_ALPHABET[usize::from(byte >> 3)]))
        .collect())
}

/// Hash a secret so raw values never touch the database.
pub fn hash_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

/// Compare two byte strings without exiting early on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b) {
        diff |= left ^ right;
    }
    std::hint::black_box(diff) == 0
}

/// Derive a password hash with PBKDF2-HMAC-SHA256.
///
/// A fresh 16-byte salt is drawn when `salt` is `None`. This is deliberately
/// slow; async callers should run it on the blocking pool.
pub fn hash_password(password: &str, salt: Option<&[u8]>) -> Result<PasswordHash> {
    let salt = match salt {
        Some(salt) => salt.to_vec(),
        None => {
            let mut bytes = vec![0u8; SALT_LENGTH];
            OsRng
                .try_fill_bytes(&mut bytes)
                .context("failed to generate password salt")?;
            bytes
        }
    };
    let derived = derive_key(password, &salt);
    Ok(PasswordHash {
        hash: Base64::encode_string(&derived),
        salt: Base64::encode_string(&salt),
    })
}

/// Re-derive `password` with the stored salt and compare in constant time.
///
/// # Errors
/// Returns an error if the stored hash or salt is not valid base64.
pub fn verify_password(password: &str, stored: &PasswordHash) -> Result<bool> {
    let salt = Base64::decode_vec(&stored.salt).map_err(|err| anyhow!("invalid salt: {err}"))?;
    let expected =
        Base64::decode_vec(&stored.hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    let derived = derive_key(password, &salt);
    Ok(constant_time_eq(&derived, &expected))
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; DERIVED_KEY_LENGTH] {
    let mut output = [0u8; DERIVED_KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut output);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn secure_token_uses_alphabet_and_length() -> Result<()> {
        let token = generate_secure_token()?;
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.bytes().all(|byte| TOKEN_ALPHABET.contains(&byte)));
        Ok(())
    }

    #[test]
    fn secure_token_excludes_ambiguous_characters() -> Result<()> {
        for _ in 0..64 {
            let token = generate_secure_token()?;
            assert!(!token.contains(['l', 'o', '0', '1']));
        }
        Ok(())
    }

    #[test]
    fn secure_tokens_do_not_repeat() -> Result<()> {
        let tokens = (0..256)
            .map(|_| generate_secure_token())
            .collect::<Result<HashSet<_>>>()?;
        assert_eq!(tokens.len(), 256);
        Ok(())
    }

    #[test]
    fn hash_secret_is_stable_sha256() {
        let first = hash_secret("secret");
        assert_eq!(first, hash_secret("secret"));
        assert_ne!(first, hash_secret("Secret"));
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn constant_time_eq_matches_only_identical_input() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"bbc"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn password_round_trip() -> Result<()> {
        let stored = hash_password("Secret123!", None)?;
        assert!(verify_password("Secret123!", &stored)?);
        assert!(!verify_password("Secret123?", &stored)?);
        Ok(())
    }

    #[test]
    fn password_hash_uses_supplied_salt() -> Result<()> {
        let salt = [7u8; SALT_LENGTH];
        let first = hash_password("hunter22", Some(&salt))?;
        let second = hash_password("hunter22", Some(&salt))?;
        assert_eq!(first, second);
        assert_eq!(Base64::decode_vec(&first.salt).ok(), Some(salt.to_vec()));
        Ok(())
    }

    #[test]
    fn password_hash_salts_differ_by_default() -> Result<()> {
        let first = hash_password("hunter22", None)?;
        let second = hash_password("hunter22", None)?;
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hash, second.hash);
        Ok(())
    }

    #[test]
    fn verify_password_rejects_corrupt_storage() {
        let stored = PasswordHash {
            hash: "not base64!".to_string(),
            salt: "also not".to_string(),
        };
        assert!(verify_password("anything", &stored).is_err());
    }
}
