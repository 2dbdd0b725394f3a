//! Per-instance gradient/hessian vectors.

use super::frame::{DataSet, FrameDecoder, FrameEncoder, WireError};

/// Interleaved `(gradient, hessian)` values, one pair per instance.
#[derive(Debug, Clone, PartialEq)]
pub struct GhPairs(Vec<f64>);

impl GhPairs {
    /// Wrap an interleaved vector.
    ///
    /// Returns `None` if the length is odd.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Option<Self> {
        (values.len() % 2 == 0).then_some(Self(values))
    }

    /// Number of instances.
    #[must_use]
    pub fn num_instances(&self) -> usize {
        self.0.len() / 2
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    /// `(g, h)` of instance `row`.
    #[must_use]
    pub fn pair(&self, row: usize) -> Option<(f64, f64)> {
        Some((*self.0.get(2 * row)?, *self.0.get(2 * row + 1)?))
    }

    /// Gather the pairs of `rows` into a new interleaved vector.
    ///
    /// Returns the first offending row if one is out of range.
    pub fn gather(&self, rows: &[i64]) -> Result<Vec<f64>, i64> {
        let mut out = Vec::with_capacity(rows.len() * 2);
        for &row in rows {
            let (g, h) = usize::try_from(row)
                .ok()
                .and_then(|r| self.pair(r))
                .ok_or(row)?;
            out.push(g);
            out.push(h);
        }
        Ok(out)
    }

    /// Encode as a `GhPairs` frame.
    ///
    /// # Errors
    /// Returns `WireError::Allocation` if the frame cannot be built.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut encoder = FrameEncoder::new(DataSet::GhPairs);
        encoder.add_float_array(&self.0)?;
        encoder.finish()
    }

    /// Decode a `GhPairs` frame that spans all of `bytes`.
    ///
    /// # Errors
    /// Returns a `WireError` if the frame is malformed, carries another data
    /// set, or holds an odd number of values.
    pub fn from_frame(bytes: &[u8]) -> Result<Self, WireError> {
        let mut decoder = FrameDecoder::parse_expecting(bytes, DataSet::GhPairs)?;
        if decoder.frame_len() != bytes.len() {
            return Err(WireError::TrailingBytes(bytes.len() - decoder.frame_len()));
        }
        let values = decoder.decode_float_array()?;
        decoder.finish()?;
        let count = values.len();
        Self::new(values).ok_or(WireError::BadCount(count as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_odd_length() {
        assert!(GhPairs::new(vec![1.0, 2.0, 3.0]).is_none());
        assert_eq!(GhPairs::new(vec![]).map(|p| p.num_instances()), Some(0));
    }

    #[test]
    fn test_gather_rows() {
        let pairs = GhPairs::new(vec![0.1, 1.0, 0.2, 2.0, 0.3, 3.0]).expect("even");
        assert_eq!(pairs.gather(&[2, 0]), Ok(vec![0.3, 3.0, 0.1, 1.0]));
        assert_eq!(pairs.gather(&[1, 3]), Err(3));
        assert_eq!(pairs.gather(&[-1]), Err(-1));
    }

    #[test]
    fn test_frame_round_trip_is_exact() {
        let pairs = GhPairs::new(vec![1.0, 2.0, -0.0, f64::MIN_POSITIVE]).expect("even");
        let frame = pairs.to_frame().expect("encode");
        let decoded = GhPairs::from_frame(&frame).expect("decode");
        assert_eq!(
            decoded.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            pairs.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_from_frame_rejects_other_data_sets() {
        let mut encoder = FrameEncoder::new(DataSet::Histograms);
        encoder.add_float_array(&[1.0, 2.0]).expect("add");
        let frame = encoder.finish().expect("finish");
        assert!(matches!(
            GhPairs::from_frame(&frame),
            Err(WireError::UnexpectedDataSet { .. })
        ));
    }

    #[test]
    fn test_from_frame_rejects_extra_bytes() {
        let pairs = GhPairs::new(vec![1.0, 2.0]).expect("even");
        let mut frame = pairs.to_frame().expect("encode");
        frame.extend_from_slice(&[0, 0]);
        assert_eq!(GhPairs::from_frame(&frame), Err(WireError::TrailingBytes(2)));
    }
}
