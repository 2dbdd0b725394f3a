//! Plaintext scheme: frames cross the boundary unchanged.
//!
//! Used by deployments that rely on a trusted transport, and as the
//! identity encoding for parties that only relay.

use crate::domain::{frame, CryptoError};
use crate::ports::{OpenedFrame, Scheme};

/// Identity transform over frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextScheme;

impl Scheme for PlaintextScheme {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn seal(&self, frame: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        Ok(frame)
    }

    fn open_next(&self, bytes: &[u8]) -> Result<OpenedFrame, CryptoError> {
        let len = frame::frame_len(bytes)?;
        Ok(OpenedFrame {
            plaintext: bytes[..len].to_vec(),
            consumed: len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame::{DataSet, FrameEncoder};
    use crate::domain::WireError;

    fn frame_of(values: &[f64]) -> Vec<u8> {
        let mut enc = FrameEncoder::new(DataSet::Histograms);
        enc.add_float_array(values).expect("add");
        enc.finish().expect("finish")
    }

    #[test]
    fn test_seal_is_identity() {
        let frame = frame_of(&[1.0, 2.0]);
        assert_eq!(PlaintextScheme.seal(frame.clone()).expect("seal"), frame);
        assert!(!PlaintextScheme.is_randomized());
    }

    #[test]
    fn test_open_all_splits_concatenated_frames() {
        let a = frame_of(&[1.0]);
        let b = frame_of(&[2.0, 3.0]);
        let gathered = [a.clone(), b.clone()].concat();

        let frames = PlaintextScheme.open_all(&gathered).expect("open");
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_open_rejects_garbage_tail() {
        let mut gathered = frame_of(&[1.0]);
        gathered.extend_from_slice(b"junk");
        assert!(matches!(
            PlaintextScheme.open_all(&gathered),
            Err(CryptoError::Framing(WireError::Truncated { .. }))
        ));
    }
}
