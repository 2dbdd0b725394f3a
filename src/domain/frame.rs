//! Frame layout for data crossing the party boundary.
//!
//! Every message is a self-delimiting frame:
//!
//! ```text
//! +----------+-----------+-------------+------------------------------+
//! | SECAGG01 | len: i64  | data_set:i64| entries...                   |
//! +----------+-----------+-------------+------------------------------+
//!   8 bytes    8 bytes     8 bytes
//! ```
//!
//! `len` counts the whole frame, header included. Each entry is an `i64`
//! entry type (1 = int64 array, 2 = float64 array), an `i64` element count,
//! then `count` little-endian 8-byte values.
//!
//! Because frames carry their own length, the all-gather collective can
//! concatenate contributions from several parties and the receiver splits
//! them again with [`frame_len`].

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Magic bytes at the start of every frame.
pub const FRAME_SIGNATURE: &[u8; 8] = b"SECAGG01";

/// Signature + total length + data-set id.
pub const HEADER_LEN: usize = 24;

const ENTRY_INT_ARRAY: i64 = 1;
const ENTRY_FLOAT_ARRAY: i64 = 2;
const ENTRY_PREFIX_LEN: usize = 16;

/// Errors produced while building or parsing frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("Frame signature mismatch")]
    BadSignature,

    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid declared frame length: {0}")]
    BadLength(i64),

    #[error("Unknown data set id: {0}")]
    UnknownDataSet(i64),

    #[error("Unexpected data set: expected {expected:?}, found {found:?}")]
    UnexpectedDataSet { expected: DataSet, found: DataSet },

    #[error("Unknown entry type: {0}")]
    UnknownEntryType(i64),

    #[error("Entry type mismatch: expected {expected}, found {found}")]
    EntryMismatch { expected: &'static str, found: &'static str },

    #[error("Invalid entry count: {0}")]
    BadCount(i64),

    #[error("No more entries in frame")]
    Exhausted,

    #[error("{0} unread bytes left in frame")]
    TrailingBytes(usize),

    #[error("Inconsistent payload: {0}")]
    Inconsistent(String),

    #[error("Frame allocation failed: {0}")]
    Allocation(String),
}

/// Kind of payload a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSet {
    GhPairs,
    Aggregation,
    AggregationWithFeatures,
    AggregationResult,
    Histograms,
    HistogramResult,
}

impl DataSet {
    /// Numeric id written into the frame header.
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::GhPairs => 1,
            Self::Aggregation => 2,
            Self::AggregationWithFeatures => 3,
            Self::AggregationResult => 4,
            Self::Histograms => 5,
            Self::HistogramResult => 6,
        }
    }

    /// Parse a header id.
    ///
    /// # Errors
    /// Returns `WireError::UnknownDataSet` for ids outside 1..=6.
    pub fn from_id(id: i64) -> Result<Self, WireError> {
        match id {
            1 => Ok(Self::GhPairs),
            2 => Ok(Self::Aggregation),
            3 => Ok(Self::AggregationWithFeatures),
            4 => Ok(Self::AggregationResult),
            5 => Ok(Self::Histograms),
            6 => Ok(Self::HistogramResult),
            other => Err(WireError::UnknownDataSet(other)),
        }
    }
}

fn entry_name(entry_type: i64) -> &'static str {
    match entry_type {
        ENTRY_INT_ARRAY => "int64 array",
        ENTRY_FLOAT_ARRAY => "float64 array",
        _ => "unknown",
    }
}

/// Read the total length declared by the frame at the start of `bytes`.
///
/// Validates the signature and that the declared length is covered by
/// `bytes`, so the caller can split `bytes[..len]` off safely.
///
/// # Errors
/// Returns a `WireError` if the header is missing, malformed or overruns.
pub fn frame_len(bytes: &[u8]) -> Result<usize, WireError> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }
    if &bytes[..8] != FRAME_SIGNATURE {
        return Err(WireError::BadSignature);
    }

    let declared = LittleEndian::read_i64(&bytes[8..16]);
    let len = usize::try_from(declared).map_err(|_| WireError::BadLength(declared))?;
    if len < HEADER_LEN {
        return Err(WireError::BadLength(declared));
    }
    if len > bytes.len() {
        return Err(WireError::Truncated {
            needed: len,
            available: bytes.len(),
        });
    }
    Ok(len)
}

/// Builds one frame entry by entry.
#[derive(Debug)]
pub struct FrameEncoder {
    data_set: DataSet,
    body: Vec<u8>,
}

impl FrameEncoder {
    /// Start a frame for `data_set`.
    #[must_use]
    pub fn new(data_set: DataSet) -> Self {
        Self {
            data_set,
            body: Vec::new(),
        }
    }

    fn reserve_entry(&mut self, count: usize) -> Result<(), WireError> {
        let bytes = count
            .checked_mul(8)
            .and_then(|n| n.checked_add(ENTRY_PREFIX_LEN))
            .ok_or_else(|| WireError::Allocation(format!("entry of {count} values overflows")))?;
        self.body
            .try_reserve(bytes)
            .map_err(|e| WireError::Allocation(e.to_string()))
    }

    fn write_prefix(&mut self, entry_type: i64, count: usize) -> Result<(), WireError> {
        let count = i64::try_from(count).map_err(|_| WireError::BadCount(i64::MAX))?;
        push_i64(&mut self.body, entry_type)?;
        push_i64(&mut self.body, count)
    }

    /// Append an int64 array entry.
    ///
    /// # Errors
    /// Returns `WireError::Allocation` if the frame cannot grow.
    pub fn add_int_array(&mut self, values: &[i64]) -> Result<(), WireError> {
        self.reserve_entry(values.len())?;
        self.write_prefix(ENTRY_INT_ARRAY, values.len())?;
        for &v in values {
            push_i64(&mut self.body, v)?;
        }
        Ok(())
    }

    /// Append a float64 array entry.
    ///
    /// # Errors
    /// Returns `WireError::Allocation` if the frame cannot grow.
    pub fn add_float_array(&mut self, values: &[f64]) -> Result<(), WireError> {
        self.reserve_entry(values.len())?;
        self.write_prefix(ENTRY_FLOAT_ARRAY, values.len())?;
        for &v in values {
            self.body
                .write_f64::<LittleEndian>(v)
                .map_err(|e| WireError::Allocation(e.to_string()))?;
        }
        Ok(())
    }

    /// Prepend the header and return the finished frame.
    ///
    /// # Errors
    /// Returns `WireError::Allocation` if the output cannot be reserved.
    pub fn finish(self) -> Result<Vec<u8>, WireError> {
        let total = HEADER_LEN + self.body.len();
        let declared = i64::try_from(total).map_err(|_| WireError::BadLength(i64::MAX))?;

        let mut out = Vec::new();
        out.try_reserve_exact(total)
            .map_err(|e| WireError::Allocation(e.to_string()))?;
        out.extend_from_slice(FRAME_SIGNATURE);
        push_i64(&mut out, declared)?;
        push_i64(&mut out, self.data_set.id())?;
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}

fn push_i64(buf: &mut Vec<u8>, v: i64) -> Result<(), WireError> {
    buf.write_i64::<LittleEndian>(v)
        .map_err(|e| WireError::Allocation(e.to_string()))
}

/// Reads the entries of one frame in order.
#[derive(Debug)]
pub struct FrameDecoder<'a> {
    data_set: DataSet,
    body: &'a [u8],
    pos: usize,
}

impl<'a> FrameDecoder<'a> {
    /// Parse the frame at the start of `bytes`.
    ///
    /// Bytes past the declared frame length are not part of this frame; use
    /// [`frame_len`] to step over it.
    ///
    /// # Errors
    /// Returns a `WireError` if the header is malformed.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, WireError> {
        let len = frame_len(bytes)?;
        let data_set = DataSet::from_id(LittleEndian::read_i64(&bytes[16..24]))?;
        Ok(Self {
            data_set,
            body: &bytes[HEADER_LEN..len],
            pos: 0,
        })
    }

    /// Parse a frame and require it to carry `expected`.
    ///
    /// # Errors
    /// Returns `WireError::UnexpectedDataSet` on a mismatch.
    pub fn parse_expecting(bytes: &'a [u8], expected: DataSet) -> Result<Self, WireError> {
        let decoder = Self::parse(bytes)?;
        if decoder.data_set != expected {
            return Err(WireError::UnexpectedDataSet {
                expected,
                found: decoder.data_set,
            });
        }
        Ok(decoder)
    }

    #[must_use]
    pub fn data_set(&self) -> DataSet {
        self.data_set
    }

    /// Total frame length, header included.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.body.len()
    }

    fn read_prefix(&mut self, expected: i64) -> Result<usize, WireError> {
        let rest = &self.body[self.pos..];
        if rest.is_empty() {
            return Err(WireError::Exhausted);
        }
        if rest.len() < ENTRY_PREFIX_LEN {
            return Err(WireError::Truncated {
                needed: ENTRY_PREFIX_LEN,
                available: rest.len(),
            });
        }

        let entry_type = LittleEndian::read_i64(&rest[..8]);
        if entry_type != ENTRY_INT_ARRAY && entry_type != ENTRY_FLOAT_ARRAY {
            return Err(WireError::UnknownEntryType(entry_type));
        }
        if entry_type != expected {
            return Err(WireError::EntryMismatch {
                expected: entry_name(expected),
                found: entry_name(entry_type),
            });
        }

        let raw_count = LittleEndian::read_i64(&rest[8..16]);
        let count = usize::try_from(raw_count).map_err(|_| WireError::BadCount(raw_count))?;
        let needed = count
            .checked_mul(8)
            .and_then(|n| n.checked_add(ENTRY_PREFIX_LEN))
            .ok_or(WireError::BadCount(raw_count))?;
        if needed > rest.len() {
            return Err(WireError::Truncated {
                needed,
                available: rest.len(),
            });
        }

        self.pos += ENTRY_PREFIX_LEN;
        Ok(count)
    }

    /// Read the next entry as an int64 array.
    ///
    /// # Errors
    /// Returns a `WireError` if the next entry is missing or not an int array.
    pub fn decode_int_array(&mut self) -> Result<Vec<i64>, WireError> {
        let count = self.read_prefix(ENTRY_INT_ARRAY)?;
        let mut values = vec![0i64; count];
        let end = self.pos + count * 8;
        LittleEndian::read_i64_into(&self.body[self.pos..end], &mut values);
        self.pos = end;
        Ok(values)
    }

    /// Read the next entry as a float64 array.
    ///
    /// # Errors
    /// Returns a `WireError` if the next entry is missing or not a float array.
    pub fn decode_float_array(&mut self) -> Result<Vec<f64>, WireError> {
        let count = self.read_prefix(ENTRY_FLOAT_ARRAY)?;
        let mut values = vec![0f64; count];
        let end = self.pos + count * 8;
        LittleEndian::read_f64_into(&self.body[self.pos..end], &mut values);
        self.pos = end;
        Ok(values)
    }

    /// Require that every entry was consumed.
    ///
    /// # Errors
    /// Returns `WireError::TrailingBytes` if unread data remains.
    pub fn finish(self) -> Result<(), WireError> {
        let left = self.body.len() - self.pos;
        if left > 0 {
            return Err(WireError::TrailingBytes(left));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut enc = FrameEncoder::new(DataSet::Histograms);
        enc.add_float_array(&[1.5]).expect("add");
        let frame = enc.finish().expect("finish");

        assert_eq!(&frame[..8], FRAME_SIGNATURE);
        assert_eq!(frame.len(), HEADER_LEN + 16 + 8);
        assert_eq!(LittleEndian::read_i64(&frame[8..16]), frame.len() as i64);
        assert_eq!(LittleEndian::read_i64(&frame[16..24]), 5);
        assert_eq!(LittleEndian::read_i64(&frame[24..32]), ENTRY_FLOAT_ARRAY);
        assert_eq!(LittleEndian::read_i64(&frame[32..40]), 1);
        assert_eq!(LittleEndian::read_f64(&frame[40..48]), 1.5);
    }

    #[test]
    fn test_mixed_entries_decode_in_order() {
        let mut enc = FrameEncoder::new(DataSet::Aggregation);
        enc.add_int_array(&[3, -1, 7]).expect("add ints");
        enc.add_float_array(&[0.25, -2.0]).expect("add floats");
        enc.add_int_array(&[]).expect("add empty");
        let frame = enc.finish().expect("finish");

        let mut dec = FrameDecoder::parse(&frame).expect("parse");
        assert_eq!(dec.data_set(), DataSet::Aggregation);
        assert_eq!(dec.decode_int_array().expect("ints"), vec![3, -1, 7]);
        assert_eq!(dec.decode_float_array().expect("floats"), vec![0.25, -2.0]);
        assert!(dec.decode_int_array().expect("empty").is_empty());
        assert!(dec.is_exhausted());
        assert_eq!(dec.decode_int_array(), Err(WireError::Exhausted));
        dec.finish().expect("nothing left");
    }

    #[test]
    fn test_entry_type_mismatch() {
        let mut enc = FrameEncoder::new(DataSet::GhPairs);
        enc.add_float_array(&[1.0]).expect("add");
        let frame = enc.finish().expect("finish");

        let mut dec = FrameDecoder::parse(&frame).expect("parse");
        assert!(matches!(
            dec.decode_int_array(),
            Err(WireError::EntryMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut frame = FrameEncoder::new(DataSet::GhPairs).finish().expect("finish");
        frame[0] = b'X';
        assert_eq!(FrameDecoder::parse(&frame).unwrap_err(), WireError::BadSignature);
    }

    #[test]
    fn test_rejects_truncated_frame() {
        let mut enc = FrameEncoder::new(DataSet::GhPairs);
        enc.add_float_array(&[1.0, 2.0]).expect("add");
        let frame = enc.finish().expect("finish");

        let cut = &frame[..frame.len() - 4];
        assert!(matches!(
            FrameDecoder::parse(cut),
            Err(WireError::Truncated { .. })
        ));
        assert!(matches!(
            frame_len(&frame[..10]),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_count_past_end() {
        let mut enc = FrameEncoder::new(DataSet::GhPairs);
        enc.add_float_array(&[1.0]).expect("add");
        let mut frame = enc.finish().expect("finish");
        LittleEndian::write_i64(&mut frame[32..40], 1_000);

        let mut dec = FrameDecoder::parse(&frame).expect("header is fine");
        assert!(matches!(
            dec.decode_float_array(),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_negative_length_and_unknown_set() {
        let mut frame = FrameEncoder::new(DataSet::GhPairs).finish().expect("finish");
        LittleEndian::write_i64(&mut frame[16..24], 42);
        assert_eq!(
            FrameDecoder::parse(&frame).unwrap_err(),
            WireError::UnknownDataSet(42)
        );

        LittleEndian::write_i64(&mut frame[8..16], -5);
        assert_eq!(frame_len(&frame).unwrap_err(), WireError::BadLength(-5));
    }

    #[test]
    fn test_parse_expecting() {
        let frame = FrameEncoder::new(DataSet::Histograms).finish().expect("finish");
        assert!(FrameDecoder::parse_expecting(&frame, DataSet::Histograms).is_ok());
        assert!(matches!(
            FrameDecoder::parse_expecting(&frame, DataSet::GhPairs),
            Err(WireError::UnexpectedDataSet { .. })
        ));
    }

    #[test]
    fn test_concatenated_frames_split_by_declared_length() {
        let mut a = FrameEncoder::new(DataSet::Histograms);
        a.add_float_array(&[1.0]).expect("add");
        let a = a.finish().expect("finish");
        let mut b = FrameEncoder::new(DataSet::Histograms);
        b.add_float_array(&[2.0, 3.0]).expect("add");
        let b = b.finish().expect("finish");

        let gathered = [a.clone(), b].concat();
        let first = frame_len(&gathered).expect("first");
        assert_eq!(first, a.len());
        let mut second = FrameDecoder::parse(&gathered[first..]).expect("second");
        assert_eq!(second.decode_float_array().expect("floats"), vec![2.0, 3.0]);
    }

    #[test]
    fn test_trailing_entries_detected() {
        let mut enc = FrameEncoder::new(DataSet::GhPairs);
        enc.add_float_array(&[1.0]).expect("add");
        enc.add_int_array(&[9]).expect("add");
        let frame = enc.finish().expect("finish");

        let mut dec = FrameDecoder::parse(&frame).expect("parse");
        dec.decode_float_array().expect("floats");
        assert_eq!(dec.finish(), Err(WireError::TrailingBytes(24)));
    }
}
