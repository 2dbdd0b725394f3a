//! Payloads of the row-level aggregation exchange.
//!
//! A party that only holds features (no labels) sends an
//! [`AggregationRequest`]: which rows sit in which tree node, with their
//! gradient pairs and, once per session, the bin of every row. The peer that
//! aggregates answers with an [`AggregationResult`]: one histogram per node,
//! node ids ascending, each histogram laid out bin-major with `(g, h)`
//! interleaved.

use std::collections::BTreeMap;

use super::frame::{DataSet, FrameDecoder, FrameEncoder, WireError};

/// Rows assigned to each node at the current depth.
///
/// A `BTreeMap` so iteration is ascending by node id regardless of the
/// order in which the host inserted nodes.
pub type NodePartition = BTreeMap<i32, Vec<i32>>;

/// Feature ids and the per-row bins of those features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLayout {
    pub features: Vec<i64>,
    /// Row-major: `bins[row * features.len() + k]` is the bin of
    /// `features[k]` for `row`, `-1` if missing.
    pub bins: Vec<i64>,
}

/// Rows of one node plus their gathered gradient pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRows {
    pub node: i64,
    pub rows: Vec<i64>,
    /// `(g, h)` of `rows`, in the same order.
    pub gh: Vec<f64>,
}

/// Outbound request for per-node histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRequest {
    pub cuts: Vec<i64>,
    /// Present only on the first request of a session in features mode.
    pub layout: Option<FeatureLayout>,
    pub nodes: Vec<NodeRows>,
}

impl AggregationRequest {
    #[must_use]
    pub fn data_set(&self) -> DataSet {
        if self.layout.is_some() {
            DataSet::AggregationWithFeatures
        } else {
            DataSet::Aggregation
        }
    }

    /// Encode as an `Aggregation` or `AggregationWithFeatures` frame.
    ///
    /// # Errors
    /// Returns `WireError::Allocation` if the frame cannot be built.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut encoder = FrameEncoder::new(self.data_set());
        encoder.add_int_array(&self.cuts)?;

        if let Some(layout) = &self.layout {
            encoder.add_int_array(&layout.features)?;
            encoder.add_int_array(&layout.bins)?;
        }

        let node_ids: Vec<i64> = self.nodes.iter().map(|n| n.node).collect();
        encoder.add_int_array(&node_ids)?;

        for node in &self.nodes {
            encoder.add_int_array(&node.rows)?;
            encoder.add_float_array(&node.gh)?;
        }

        encoder.finish()
    }

    /// Decode a request frame spanning all of `bytes`.
    ///
    /// # Errors
    /// Returns a `WireError` if the frame is malformed or internally
    /// inconsistent.
    pub fn from_frame(bytes: &[u8]) -> Result<Self, WireError> {
        let mut decoder = FrameDecoder::parse(bytes)?;
        let with_features = match decoder.data_set() {
            DataSet::Aggregation => false,
            DataSet::AggregationWithFeatures => true,
            found => {
                return Err(WireError::UnexpectedDataSet {
                    expected: DataSet::Aggregation,
                    found,
                })
            }
        };

        let cuts = decoder.decode_int_array()?;

        let layout = if with_features {
            let features = decoder.decode_int_array()?;
            let bins = decoder.decode_int_array()?;
            let ragged = if features.is_empty() {
                !bins.is_empty()
            } else {
                bins.len() % features.len() != 0
            };
            if ragged {
                return Err(WireError::Inconsistent(format!(
                    "{} bins for {} features",
                    bins.len(),
                    features.len()
                )));
            }
            Some(FeatureLayout { features, bins })
        } else {
            None
        };

        let node_ids = decoder.decode_int_array()?;
        ensure_ascending(&node_ids)?;

        let mut nodes = Vec::with_capacity(node_ids.len());
        for node in node_ids {
            let rows = decoder.decode_int_array()?;
            let gh = decoder.decode_float_array()?;
            if gh.len() != rows.len() * 2 {
                return Err(WireError::Inconsistent(format!(
                    "node {node}: {} rows but {} gradient values",
                    rows.len(),
                    gh.len()
                )));
            }
            nodes.push(NodeRows { node, rows, gh });
        }

        decoder.finish()?;
        Ok(Self {
            cuts,
            layout,
            nodes,
        })
    }
}

/// Histogram of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHistogram {
    pub node: i64,
    /// `[g_bin0, h_bin0, g_bin1, h_bin1, ...]`
    pub values: Vec<f64>,
}

/// Response of an aggregating peer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregationResult {
    pub nodes: Vec<NodeHistogram>,
}

impl AggregationResult {
    /// Encode as an `AggregationResult` frame.
    ///
    /// # Errors
    /// Returns `WireError::Allocation` if the frame cannot be built.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut encoder = FrameEncoder::new(DataSet::AggregationResult);
        let node_ids: Vec<i64> = self.nodes.iter().map(|n| n.node).collect();
        encoder.add_int_array(&node_ids)?;
        for node in &self.nodes {
            encoder.add_float_array(&node.values)?;
        }
        encoder.finish()
    }

    /// Decode a result frame spanning all of `bytes`.
    ///
    /// Node ids must be strictly ascending and all histograms must share
    /// one even length; anything else means the two sides disagree on the
    /// ordering contract.
    ///
    /// # Errors
    /// Returns a `WireError` if the frame is malformed or inconsistent.
    pub fn from_frame(bytes: &[u8]) -> Result<Self, WireError> {
        let mut decoder = FrameDecoder::parse_expecting(bytes, DataSet::AggregationResult)?;
        let node_ids = decoder.decode_int_array()?;
        ensure_ascending(&node_ids)?;

        let mut nodes: Vec<NodeHistogram> = Vec::with_capacity(node_ids.len());
        for node in node_ids {
            let values = decoder.decode_float_array()?;
            if values.len() % 2 != 0 {
                return Err(WireError::Inconsistent(format!(
                    "node {node}: odd histogram length {}",
                    values.len()
                )));
            }
            if let Some(first) = nodes.first() {
                if first.values.len() != values.len() {
                    return Err(WireError::Inconsistent(format!(
                        "node {node}: histogram length {} differs from {}",
                        values.len(),
                        first.values.len()
                    )));
                }
            }
            nodes.push(NodeHistogram { node, values });
        }

        decoder.finish()?;
        Ok(Self { nodes })
    }

    /// Histograms concatenated node-major.
    #[must_use]
    pub fn flatten(self) -> Vec<f64> {
        self.nodes.into_iter().flat_map(|n| n.values).collect()
    }
}

fn ensure_ascending(node_ids: &[i64]) -> Result<(), WireError> {
    match node_ids.windows(2).find(|w| w[1] <= w[0]) {
        Some(w) => Err(WireError::Inconsistent(format!(
            "node ids not strictly ascending: {} then {}",
            w[0], w[1]
        ))),
        None => Ok(()),
    }
}
