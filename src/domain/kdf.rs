//! Key derivation for keyed schemes.
//!
//! Every party of a session derives the same 256-bit key from a shared
//! passphrase and a shared salt using Argon2id. The derivation runs once at
//! initialization; per-buffer work only touches the derived key.
//!
//! # Security
//!
//! - Argon2id is memory-hard, so a leaked salt does not make the passphrase
//!   cheap to brute-force
//! - The salt is not secret but must be identical across parties

use aes_gcm::aead::OsRng;
use argon2::{password_hash::SaltString, Algorithm, Argon2, Params, PasswordHasher, Version};
use thiserror::Error;
use zeroize::Zeroizing;

use super::crypto::SessionKey;

/// Default Argon2 memory cost in KiB.
pub const DEFAULT_MEMORY_KIB: u32 = 47104;

/// Errors during key derivation.
#[derive(Debug, Error)]
pub enum KdfError {
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Invalid salt: {0}")]
    InvalidSalt(String),

    #[error("Passphrase must not be empty")]
    EmptyPassphrase,
}

/// Derive the session key from a passphrase and a base64 salt.
///
/// # Arguments
/// * `passphrase` - Secret shared by all parties
/// * `salt_b64` - Salt in the unpadded base64 alphabet used by `generate_salt()`
/// * `memory_kib` - Argon2 memory cost
///
/// # Errors
/// Returns error if the salt is malformed or Argon2 rejects the parameters.
pub fn derive_session_key(
    passphrase: &str,
    salt_b64: &str,
    memory_kib: u32,
) -> Result<SessionKey, KdfError> {
    if passphrase.is_empty() {
        return Err(KdfError::EmptyPassphrase);
    }
    let salt =
        SaltString::from_b64(salt_b64.trim()).map_err(|e| KdfError::InvalidSalt(e.to_string()))?;

    let params = Params::new(memory_kib, 1, 1, Some(32))
        .map_err(|e| KdfError::Derivation(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| KdfError::Derivation(e.to_string()))?;
    let output = hash
        .hash
        .ok_or_else(|| KdfError::Derivation("Hash output missing".to_string()))?;

    let bytes = output.as_bytes();
    if bytes.len() < 32 {
        return Err(KdfError::Derivation("Hash too short".to_string()));
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes[..32]);
    Ok(SessionKey::from_bytes(*key))
}

/// Generate a random salt to distribute to the other parties.
#[must_use]
pub fn generate_salt() -> String {
    SaltString::generate(&mut OsRng).to_string()
}
