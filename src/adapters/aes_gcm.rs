//! AES-GCM scheme: frames sealed under a key shared by all parties.
//!
//! Protects gradient and histogram data from the transport and any relay in
//! the collective. Every party holding the session passphrase can open
//! every frame, so this scheme does not hide one party's data from another.
//!
//! # Envelope
//!
//! ```text
//! +----------+----------------+-------------+--------------------------+
//! | SECGCM01 | body_len: u64  | nonce (12)  | ciphertext + tag (16)    |
//! +----------+----------------+-------------+--------------------------+
//! ```
//!
//! The 16-byte envelope header is authenticated as associated data, so a
//! relay cannot splice bodies between envelopes of different lengths.
//! Nonces are random per seal; sealing the same frame twice yields
//! different envelopes.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use byteorder::{ByteOrder, LittleEndian};
use zeroize::Zeroizing;

use crate::domain::config::AesGcmSettings;
use crate::domain::kdf::derive_session_key;
use crate::domain::{CryptoError, SessionKey};
use crate::ports::{OpenedFrame, Scheme};

/// Magic bytes at the start of every envelope.
pub const ENVELOPE_SIGNATURE: &[u8; 8] = b"SECGCM01";

const ENVELOPE_HEADER_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM envelope scheme.
pub struct AesGcmScheme {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl AesGcmScheme {
    /// Build the scheme from an already derived key.
    ///
    /// # Errors
    /// Returns `CryptoError::Seal` if the cipher rejects the key.
    pub fn new(key: &SessionKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Seal(e.to_string()))?;
        Ok(Self {
            cipher,
            fingerprint: key.fingerprint.clone(),
        })
    }

    /// Derive the session key from the configured passphrase and salt.
    ///
    /// # Errors
    /// Returns `CryptoError::KeyDerivation` if derivation fails.
    pub fn from_settings(settings: &AesGcmSettings) -> Result<Self, CryptoError> {
        let key = derive_session_key(&settings.passphrase, &settings.salt, settings.memory_kib)?;
        tracing::info!(
            key_fingerprint = %key.fingerprint,
            "Derived AES-GCM session key"
        );
        Self::new(&key)
    }

    /// Fingerprint of the session key, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn header(body_len: usize) -> [u8; ENVELOPE_HEADER_LEN] {
        let mut header = [0u8; ENVELOPE_HEADER_LEN];
        header[..8].copy_from_slice(ENVELOPE_SIGNATURE);
        LittleEndian::write_u64(&mut header[8..], body_len as u64);
        header
    }
}

impl std::fmt::Debug for AesGcmScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmScheme")
            .field("key_fingerprint", &self.fingerprint)
            .finish()
    }
}

impl Scheme for AesGcmScheme {
    fn name(&self) -> &'static str {
        "aes-gcm"
    }

    fn is_randomized(&self) -> bool {
        true
    }

    fn seal(&self, frame: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        let frame = Zeroizing::new(frame);
        let body_len = NONCE_LEN + frame.len() + TAG_LEN;
        let header = Self::header(body_len);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: frame.as_slice(),
                    aad: &header,
                },
            )
            .map_err(|e| CryptoError::Seal(e.to_string()))?;

        let mut out = Vec::new();
        out.try_reserve_exact(ENVELOPE_HEADER_LEN + body_len)
            .map_err(|e| CryptoError::Allocation(e.to_string()))?;
        out.extend_from_slice(&header);
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        tracing::trace!(size_bytes = out.len(), "Sealed frame");
        Ok(out)
    }

    fn open_next(&self, bytes: &[u8]) -> Result<OpenedFrame, CryptoError> {
        if bytes.len() < ENVELOPE_HEADER_LEN {
            return Err(CryptoError::MalformedEnvelope(format!(
                "{} bytes is shorter than the envelope header",
                bytes.len()
            )));
        }
        if &bytes[..8] != ENVELOPE_SIGNATURE {
            return Err(CryptoError::MalformedEnvelope("signature mismatch".into()));
        }

        let declared = LittleEndian::read_u64(&bytes[8..ENVELOPE_HEADER_LEN]);
        let body_len = usize::try_from(declared)
            .ok()
            .filter(|&n| n >= NONCE_LEN + TAG_LEN)
            .ok_or_else(|| {
                CryptoError::MalformedEnvelope(format!("invalid body length {declared}"))
            })?;
        let total = ENVELOPE_HEADER_LEN
            .checked_add(body_len)
            .filter(|&t| t <= bytes.len())
            .ok_or_else(|| {
                CryptoError::MalformedEnvelope(format!(
                    "body of {body_len} bytes overruns {} available",
                    bytes.len() - ENVELOPE_HEADER_LEN
                ))
            })?;

        let header = &bytes[..ENVELOPE_HEADER_LEN];
        let nonce_end = ENVELOPE_HEADER_LEN + NONCE_LEN;
        let nonce = Nonce::from_slice(&bytes[ENVELOPE_HEADER_LEN..nonce_end]);

        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &bytes[nonce_end..total],
                    aad: header,
                },
            )
            .map_err(|_| CryptoError::Authentication)?;

        Ok(OpenedFrame {
            plaintext,
            consumed: total,
        })
    }
}
