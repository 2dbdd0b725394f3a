//! Scheme port: Trait for the transform applied to frames.
//!
//! This trait abstracts the cryptographic backend from the processor's
//! buffer handling. A scheme turns a plaintext frame into its wire form and
//! back; it never looks inside the frame.

use crate::domain::CryptoError;

/// One wire frame opened by [`Scheme::open_next`].
#[derive(Debug)]
pub struct OpenedFrame {
    /// The plaintext frame.
    pub plaintext: Vec<u8>,
    /// How many input bytes the wire frame occupied.
    pub consumed: usize,
}

/// Trait for scheme operations.
///
/// Implementations provide:
/// - Sealing of a complete plaintext frame
/// - Opening of the first wire frame in a buffer that may hold several
///   concatenated wire frames (one per party, as produced by all-gather)
pub trait Scheme: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether two seals of the same frame can differ.
    fn is_randomized(&self) -> bool {
        false
    }

    /// Turn a plaintext frame into its wire form.
    ///
    /// # Errors
    /// Returns `CryptoError::Seal` if the transform fails and
    /// `CryptoError::Allocation` if the output cannot be allocated.
    fn seal(&self, frame: Vec<u8>) -> Result<Vec<u8>, CryptoError>;

    /// Open the wire frame at the start of `bytes`.
    ///
    /// # Errors
    /// Returns `CryptoError` if the wire frame is malformed or fails
    /// authentication.
    fn open_next(&self, bytes: &[u8]) -> Result<OpenedFrame, CryptoError>;

    /// Open every wire frame in `bytes`, in order.
    ///
    /// # Errors
    /// Returns the first error from [`Scheme::open_next`].
    fn open_all(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CryptoError> {
        let mut frames = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let opened = self.open_next(rest)?;
            if opened.consumed == 0 {
                return Err(CryptoError::MalformedEnvelope(
                    "scheme consumed no bytes".into(),
                ));
            }
            rest = &rest[opened.consumed..];
            frames.push(opened.plaintext);
        }
        Ok(frames)
    }
}
