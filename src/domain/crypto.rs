//! Key material shared by the parties of one training session.
//!
//! # Memory Security
//!
//! `SessionKey` implements `Zeroize` and `ZeroizeOnDrop` so the derived key
//! is erased when the session shuts down or the processor is dropped.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::frame::WireError;
use super::kdf::KdfError;

/// Error type for scheme operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(#[from] KdfError),

    #[error("Sealing failed: {0}")]
    Seal(String),

    #[error("Envelope allocation failed: {0}")]
    Allocation(String),

    #[error("Authentication failed: envelope was tampered with or sealed under another key")]
    Authentication,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Framing error: {0}")]
    Framing(#[from] WireError),
}

/// Symmetric key shared by every party of a session.
///
/// `Debug` prints the fingerprint only.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; 32],

    /// Key fingerprint for identification (NOT secret)
    #[zeroize(skip)]
    pub fingerprint: String,
}

impl SessionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let fingerprint = compute_fingerprint(&bytes);
        Self { bytes, fingerprint }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// First 8 bytes of the SHA-256 of the key, hex encoded.
///
/// Lets parties confirm in their logs that they derived the same key
/// without logging the key itself.
fn compute_fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_debug_no_leak() {
        let key = SessionKey::from_bytes([0xab; 32]);
        let debug_output = format!("{key:?}");

        // Only the fingerprint field is rendered.
        assert_eq!(
            debug_output,
            format!("SessionKey {{ fingerprint: {:?} }}", key.fingerprint)
        );
    }

    #[test]
    fn test_fingerprint_uses_hash() {
        let fp = compute_fingerprint(&[0xde, 0xad, 0xbe, 0xef]);
        assert_ne!(fp, "deadbeef");
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn test_same_key_same_fingerprint() {
        let a = SessionKey::from_bytes([7; 32]);
        let b = SessionKey::from_bytes([7; 32]);
        let c = SessionKey::from_bytes([8; 32]);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
