//! Peer aggregator: the collective side of the aggregation exchange.
//!
//! A party holding labels receives aggregation requests from feature
//! holders and answers each with per-node histograms built from the rows
//! and gradient pairs in the request. It also merges whole-histogram
//! contributions into one result.
//!
//! # Histogram layout
//!
//! Every node histogram spans all global bins, `(g, h)` interleaved:
//! `hist[2 * bin]` is the gradient sum, `hist[2 * bin + 1]` the hessian sum.
//! Its length is `2 * cuts.last()`.

use crate::domain::frame::DataSet;
use crate::domain::{
    histogram, AggregationRequest, AggregationResult, FeatureLayout, NodeHistogram, NodeRows,
};
use crate::ports::Scheme;
use crate::{Result, SecAggError};

/// Answers aggregation requests and merges histogram contributions.
pub struct HistogramAggregator {
    scheme: Box<dyn Scheme>,
    layout: Option<FeatureLayout>,
}

impl HistogramAggregator {
    /// Create an aggregator that opens and seals with `scheme`.
    #[must_use]
    pub fn new(scheme: Box<dyn Scheme>) -> Self {
        Self {
            scheme,
            layout: None,
        }
    }

    /// Layout cached from the first request that carried one.
    #[must_use]
    pub fn layout(&self) -> Option<&FeatureLayout> {
        self.layout.as_ref()
    }

    /// Build the per-node histograms for one request and seal them.
    ///
    /// # Errors
    /// Returns `SecAggError::CorruptBuffer` if the request does not open or
    /// decode, and `SecAggError::InvalidState` if it carries no layout and
    /// none was cached yet.
    pub fn respond(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let opened = self.scheme.open_next(request)?;
        if opened.consumed != request.len() {
            return Err(SecAggError::CorruptBuffer(format!(
                "{} bytes after the aggregation request",
                request.len() - opened.consumed
            )));
        }
        let request = AggregationRequest::from_frame(&opened.plaintext)?;

        if let Some(layout) = request.layout {
            tracing::debug!(
                features = layout.features.len(),
                "Cached feature layout from aggregation request"
            );
            self.layout = Some(layout);
        }
        let layout = self.layout.as_ref().ok_or_else(|| {
            SecAggError::InvalidState("aggregation request without a known feature layout".into())
        })?;

        let total_bins = request
            .cuts
            .last()
            .copied()
            .and_then(|c| usize::try_from(c).ok())
            .ok_or_else(|| SecAggError::CorruptBuffer("request carries no bin cuts".into()))?;

        let mut result = AggregationResult::default();
        for node in &request.nodes {
            let values = build_node_histogram(node, layout, total_bins)?;
            tracing::trace!(node = node.node, rows = node.rows.len(), "Built node histogram");
            result.nodes.push(NodeHistogram {
                node: node.node,
                values,
            });
        }

        let sealed = self.scheme.seal(result.to_frame()?)?;
        tracing::debug!(
            nodes = result.nodes.len(),
            size_bytes = sealed.len(),
            "Answered aggregation request"
        );
        Ok(sealed)
    }

    /// Sum concatenated `Histograms` frames element-wise into one sealed
    /// `HistogramResult` frame.
    ///
    /// # Errors
    /// Returns `SecAggError::CorruptBuffer` if a frame does not decode or
    /// the contributions differ in length.
    pub fn merge_histograms(&self, gathered: &[u8]) -> Result<Vec<u8>> {
        let frames = self.scheme.open_all(gathered)?;
        let mut merged: Option<Vec<f64>> = None;

        for frame in &frames {
            let (_, values) = histogram::from_frame(frame)?;
            match merged.as_mut() {
                None => merged = Some(values),
                Some(acc) => {
                    if acc.len() != values.len() {
                        return Err(SecAggError::CorruptBuffer(format!(
                            "histogram of {} values merged into {}",
                            values.len(),
                            acc.len()
                        )));
                    }
                    for (a, v) in acc.iter_mut().zip(values) {
                        *a += v;
                    }
                }
            }
        }

        let merged = merged.unwrap_or_default();
        tracing::debug!(
            contributions = frames.len(),
            values = merged.len(),
            "Merged histograms"
        );
        let frame = histogram::to_frame(DataSet::HistogramResult, &merged)?;
        Ok(self.scheme.seal(frame)?)
    }
}

impl std::fmt::Debug for HistogramAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramAggregator")
            .field("scheme", &self.scheme.name())
            .field("has_layout", &self.layout.is_some())
            .finish()
    }
}

/// Accumulate the `(g, h)` of every row of `node` into its bins.
fn build_node_histogram(
    node: &NodeRows,
    layout: &FeatureLayout,
    total_bins: usize,
) -> Result<Vec<f64>> {
    let n_features = layout.features.len();
    let mut hist = vec![0.0; 2 * total_bins];
    if n_features == 0 {
        return Ok(hist);
    }

    for (&row, gh) in node.rows.iter().zip(node.gh.chunks_exact(2)) {
        let start = usize::try_from(row)
            .ok()
            .and_then(|r| r.checked_mul(n_features))
            .filter(|&s| s.checked_add(n_features).is_some_and(|e| e <= layout.bins.len()))
            .ok_or_else(|| {
                SecAggError::CorruptBuffer(format!(
                    "node {}: row {row} has no bins in the cached layout",
                    node.node
                ))
            })?;

        for &bin in &layout.bins[start..start + n_features] {
            // Missing slots contribute nothing.
            let Ok(bin) = usize::try_from(bin) else {
                continue;
            };
            if bin >= total_bins {
                return Err(SecAggError::CorruptBuffer(format!(
                    "bin {bin} outside 0..{total_bins}"
                )));
            }
            hist[2 * bin] += gh[0];
            hist[2 * bin + 1] += gh[1];
        }
    }
    Ok(hist)
}
