//! Secure processor: the codec every party runs at its trust boundary.
//!
//! This service coordinates:
//! - The session state machine (initialize, context, shutdown)
//! - Framing of gradient pairs, row partitions and histograms
//! - The scheme transform applied before bytes leave the party
//! - The ledger of buffers handed to the host

use crate::adapters;
use crate::domain::frame::DataSet;
use crate::domain::{
    histogram, AggregationContext, AggregationRequest, AggregationResult, BufferLedger,
    EncodedBuffer, FeatureLayout, GhPairs, LedgerStats, NodePartition, NodeRows, Params, Phase,
    ProcessorConfig, Release, SessionDiagnostics, SessionError, SessionState, WireError,
};
use crate::ports::{Processor, Scheme};
use crate::{Result, SecAggError};

/// [`Processor`] implementation over a pluggable [`Scheme`].
///
/// # Key Memory Security
///
/// The scheme (and with it any derived key) lives only between
/// `initialize` and `shutdown`. Keyed schemes zeroize their key material
/// when dropped.
pub struct SecureProcessor {
    session: SessionState,
    scheme: Option<Box<dyn Scheme>>,
    ledger: BufferLedger,
}

impl SecureProcessor {
    /// Create a processor with no live session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: SessionState::new(),
            scheme: None,
            ledger: BufferLedger::new(),
        }
    }

    /// Read-only view of the session, for hosts and tests.
    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Name of the scheme in use, if a session is live.
    #[must_use]
    pub fn scheme_name(&self) -> Option<&'static str> {
        self.scheme.as_ref().map(|s| s.name())
    }

    /// Issued buffers not yet handed back.
    #[must_use]
    pub fn outstanding_buffers(&self) -> usize {
        self.ledger.outstanding()
    }

    fn scheme(&self, op: &'static str) -> Result<&dyn Scheme> {
        self.scheme
            .as_deref()
            .ok_or_else(|| SessionError::NotInitialized(op).into())
    }

    fn seal_and_issue(&mut self, op: &'static str, frame: Vec<u8>) -> Result<EncodedBuffer> {
        let wire = self.scheme(op)?.seal(frame)?;
        Ok(self.ledger.issue(wire))
    }
}

impl Default for SecureProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SecureProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureProcessor")
            .field("phase", &self.session.phase())
            .field("scheme", &self.scheme_name())
            .field("outstanding_buffers", &self.ledger.outstanding())
            .finish()
    }
}

impl Processor for SecureProcessor {
    fn initialize(&mut self, active: bool, params: Params) -> Result<()> {
        if self.session.phase() != Phase::Created {
            return Err(SessionError::AlreadyInitialized.into());
        }

        let config = ProcessorConfig::from_params(&params)?;
        let scheme = adapters::build_scheme(&config)?;
        self.session.initialize(active, params, config.send_features)?;

        tracing::info!(
            active,
            scheme = scheme.name(),
            randomized = scheme.is_randomized(),
            send_features = config.send_features,
            "Secure aggregation session initialized"
        );
        self.scheme = Some(scheme);
        Ok(())
    }

    fn shutdown(&mut self) {
        let was_live = self.session.shutdown();
        self.scheme = None;

        if was_live {
            tracing::info!(
                outstanding_buffers = self.ledger.outstanding(),
                "Secure aggregation session shut down"
            );
        }
    }

    fn init_aggregation_context(&mut self, cuts: &[u32], slots: &[i32]) -> Result<()> {
        self.session.install_context(cuts, slots)?;
        Ok(())
    }

    fn process_gh_pairs(&mut self, pairs: &[f64]) -> Result<EncodedBuffer> {
        const OP: &str = "process_gh_pairs";
        self.session.require_initialized(OP)?;

        let gh = GhPairs::new(pairs.to_vec()).ok_or_else(|| {
            SecAggError::InvalidInput(format!(
                "gradient pairs need an even number of values, got {}",
                pairs.len()
            ))
        })?;
        let frame = gh.to_frame()?;

        // Relaying parties use the identity encoding.
        let buffer = if self.session.is_active() {
            self.seal_and_issue(OP, frame)?
        } else {
            self.ledger.issue(frame)
        };

        tracing::debug!(
            instances = gh.num_instances(),
            size_bytes = buffer.len(),
            "Encoded gradient pairs"
        );
        self.session.round_mut().gh_pairs = Some(gh);
        Ok(buffer)
    }

    fn handle_gh_pairs(&mut self, buffer: &[u8]) -> Result<EncodedBuffer> {
        const OP: &str = "handle_gh_pairs";
        self.session.require_initialized(OP)?;

        if !self.session.is_active() {
            if let Ok(gh) = GhPairs::from_frame(buffer) {
                self.session.round_mut().gh_pairs = Some(gh);
            }

            let mut copy = Vec::new();
            copy.try_reserve_exact(buffer.len())
                .map_err(|e| SecAggError::AllocationFailure(e.to_string()))?;
            copy.extend_from_slice(buffer);
            tracing::debug!(size_bytes = copy.len(), "Passed gradient pairs through");
            return Ok(self.ledger.issue(copy));
        }

        let opened = self.scheme(OP)?.open_next(buffer)?;
        if opened.consumed != buffer.len() {
            return Err(WireError::TrailingBytes(buffer.len() - opened.consumed).into());
        }

        let gh = GhPairs::from_frame(&opened.plaintext)?;
        tracing::debug!(
            instances = gh.num_instances(),
            size_bytes = opened.plaintext.len(),
            "Decoded gradient pairs"
        );
        self.session.round_mut().gh_pairs = Some(gh);
        Ok(self.ledger.issue(opened.plaintext))
    }

    fn process_aggregation(&mut self, nodes: &NodePartition) -> Result<EncodedBuffer> {
        const OP: &str = "process_aggregation";
        let send_features = self.session.send_features();

        let request = {
            let (context, round) = self.session.context_and_round(OP)?;
            let gh = round.gh_pairs.as_ref().ok_or_else(|| {
                SecAggError::InvalidState(format!(
                    "{OP} called before gradient pairs were recorded"
                ))
            })?;

            let mut node_rows = Vec::with_capacity(nodes.len());
            for (&node, rows) in nodes {
                let rows: Vec<i64> = rows.iter().map(|&r| i64::from(r)).collect();
                let pairs = gh.gather(&rows).map_err(|row| {
                    SecAggError::InvalidState(format!(
                        "node {node}: row {row} outside the {} recorded instances",
                        gh.num_instances()
                    ))
                })?;
                tracing::trace!(node, rows = rows.len(), "Gathered node rows");
                node_rows.push(NodeRows {
                    node: i64::from(node),
                    rows,
                    gh: pairs,
                });
            }

            let layout = if send_features && !round.feature_sent {
                if round.features.is_empty() {
                    round.features = context.present_features();
                }
                Some(FeatureLayout {
                    features: round.features.clone(),
                    bins: context.bins_for(&round.features),
                })
            } else {
                None
            };

            AggregationRequest {
                cuts: context.cuts().iter().map(|&c| i64::from(c)).collect(),
                layout,
                nodes: node_rows,
            }
        };

        let data_set = request.data_set();
        let frame = request.to_frame()?;
        let buffer = self.seal_and_issue(OP, frame)?;

        if data_set == DataSet::AggregationWithFeatures {
            self.session.round_mut().feature_sent = true;
        }
        tracing::debug!(
            nodes = nodes.len(),
            with_features = data_set == DataSet::AggregationWithFeatures,
            size_bytes = buffer.len(),
            "Encoded aggregation request"
        );
        Ok(buffer)
    }

    fn handle_aggregation(&mut self, buffer: &[u8]) -> Result<Vec<f64>> {
        const OP: &str = "handle_aggregation";
        let width = histogram_width(self.session.require_context(OP)?);

        let frames = self.scheme(OP)?.open_all(buffer)?;
        let mut sums = Vec::new();
        for frame in &frames {
            let result = AggregationResult::from_frame(frame)?;
            if let Some(node) = result.nodes.iter().find(|n| n.values.len() != width) {
                return Err(SecAggError::CorruptBuffer(format!(
                    "node {} histogram has {} values, context expects {width}",
                    node.node,
                    node.values.len()
                )));
            }
            tracing::trace!(nodes = result.nodes.len(), "Decoded aggregation result");
            sums.extend(result.flatten());
        }

        tracing::debug!(
            frames = frames.len(),
            values = sums.len(),
            "Decoded aggregated histograms"
        );
        Ok(sums)
    }

    fn process_histograms(&mut self, histograms: &[f64]) -> Result<EncodedBuffer> {
        const OP: &str = "process_histograms";
        let width = histogram_width(self.session.require_context(OP)?);
        if !spans_whole_histograms(histograms.len(), width) {
            return Err(SecAggError::InvalidInput(format!(
                "{} histogram values do not fill histograms of {width}",
                histograms.len()
            )));
        }

        let frame = histogram::to_frame(DataSet::Histograms, histograms)?;
        let buffer = self.seal_and_issue(OP, frame)?;
        tracing::debug!(
            values = histograms.len(),
            size_bytes = buffer.len(),
            "Encoded histograms"
        );
        Ok(buffer)
    }

    fn handle_histograms(&mut self, buffer: &[u8]) -> Result<Vec<f64>> {
        const OP: &str = "handle_histograms";
        let width = histogram_width(self.session.require_context(OP)?);

        let frames = self.scheme(OP)?.open_all(buffer)?;
        let mut values = Vec::new();
        let mut frame_len = None;
        for frame in &frames {
            let (_, part) = histogram::from_frame(frame)?;
            let expected = *frame_len.get_or_insert(part.len());
            if part.len() != expected || !spans_whole_histograms(part.len(), width) {
                return Err(SecAggError::CorruptBuffer(format!(
                    "histogram frame of {} values, expected {expected} in histograms of {width}",
                    part.len()
                )));
            }
            values.extend(part);
        }

        tracing::debug!(
            frames = frames.len(),
            values = values.len(),
            "Decoded histograms"
        );
        Ok(values)
    }

    fn free_buffer(&mut self, buffer: EncodedBuffer) {
        let id = buffer.id();
        match self.ledger.release(buffer) {
            Release::Released => tracing::trace!(?id, "Buffer released"),
            Release::Unknown => tracing::warn!(
                event = "unknown_buffer_release",
                ?id,
                "Released a buffer this processor did not issue; ignoring"
            ),
        }
    }

    fn phase(&self) -> Phase {
        self.session.phase()
    }

    fn diagnostics(&self) -> SessionDiagnostics {
        self.session.diagnostics()
    }

    fn buffer_stats(&self) -> LedgerStats {
        self.ledger.stats()
    }
}

/// Values in one node histogram: `(g, h)` for every global bin.
fn histogram_width(context: &AggregationContext) -> usize {
    2 * context.total_bins()
}

/// Whether `len` values are a whole number of histograms of `width`.
fn spans_whole_histograms(len: usize, width: usize) -> bool {
    len.checked_rem(width).map_or(len == 0, |rest| rest == 0)
}
