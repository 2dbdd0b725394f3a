//! Per-bin histogram vectors exchanged whole, without row detail.

use super::frame::{DataSet, FrameDecoder, FrameEncoder, WireError};

/// Encode `values` as a `Histograms` or `HistogramResult` frame.
///
/// # Errors
/// Returns `WireError::Allocation` if the frame cannot be built.
pub fn to_frame(data_set: DataSet, values: &[f64]) -> Result<Vec<u8>, WireError> {
    let mut encoder = FrameEncoder::new(data_set);
    encoder.add_float_array(values)?;
    encoder.finish()
}

/// Decode one histogram frame of either kind.
///
/// # Errors
/// Returns a `WireError` if the frame is malformed or carries a data set
/// other than `Histograms` / `HistogramResult`.
pub fn from_frame(bytes: &[u8]) -> Result<(DataSet, Vec<f64>), WireError> {
    let mut decoder = FrameDecoder::parse(bytes)?;
    let data_set = decoder.data_set();
    if !matches!(data_set, DataSet::Histograms | DataSet::HistogramResult) {
        return Err(WireError::UnexpectedDataSet {
            expected: DataSet::Histograms,
            found: data_set,
        });
    }
    let values = decoder.decode_float_array()?;
    decoder.finish()?;
    Ok((data_set, values))
}
