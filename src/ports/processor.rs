//! Processor port: the surface the host training loop calls.

use crate::domain::{
    EncodedBuffer, LedgerStats, NodePartition, Params, Phase, SessionDiagnostics,
};
use crate::Result;

/// Trait for secure-aggregation processors.
///
/// One implementation instance serves one session at a time. The host calls
/// [`Processor::initialize`] once, then per boosting round one
/// gradient-pair exchange followed by any number of aggregation or
/// histogram exchanges, and finally [`Processor::shutdown`].
///
/// Every returned [`EncodedBuffer`] belongs to the caller until handed back
/// through [`Processor::free_buffer`].
pub trait Processor: Send + Sync {
    /// Start a session.
    ///
    /// # Arguments
    /// * `active` - Whether this party decodes and aggregates, or only relays
    /// * `params` - Configuration; unrecognized keys are ignored
    ///
    /// # Errors
    /// Returns `SecAggError::InvalidState` if a session is already live and
    /// `SecAggError::Config` / `SecAggError::Crypto` if the configuration
    /// cannot produce a scheme.
    fn initialize(&mut self, active: bool, params: Params) -> Result<()>;

    /// End the session and wipe its state. Idempotent.
    fn shutdown(&mut self);

    /// Establish the quantization layout. Only the first call per session
    /// takes effect; later calls are logged and ignored.
    ///
    /// # Errors
    /// Returns `SecAggError::InvalidState` before initialize and
    /// `SecAggError::InvalidContext` if the first layout is inconsistent.
    fn init_aggregation_context(&mut self, cuts: &[u32], slots: &[i32]) -> Result<()>;

    /// Encode the gradient pairs of this round.
    ///
    /// # Errors
    /// Returns `SecAggError::InvalidState` before initialize.
    fn process_gh_pairs(&mut self, pairs: &[f64]) -> Result<EncodedBuffer>;

    /// Decode gradient pairs received from the collective.
    ///
    /// # Errors
    /// Returns `SecAggError::CorruptBuffer` if the bytes do not open to a
    /// gradient-pair frame.
    fn handle_gh_pairs(&mut self, buffer: &[u8]) -> Result<EncodedBuffer>;

    /// Encode the node to row-set partition for the collective.
    ///
    /// # Errors
    /// Returns `SecAggError::InvalidState` before the aggregation context is
    /// established or when no gradient pairs were recorded.
    fn process_aggregation(&mut self, nodes: &NodePartition) -> Result<EncodedBuffer>;

    /// Decode aggregated per-node histograms, node-major, bin-minor.
    ///
    /// # Errors
    /// Returns `SecAggError::CorruptBuffer` on malformed input.
    fn handle_aggregation(&mut self, buffer: &[u8]) -> Result<Vec<f64>>;

    /// Encode a locally summed histogram vector.
    ///
    /// # Errors
    /// Returns `SecAggError::InvalidState` before the aggregation context is
    /// established.
    fn process_histograms(&mut self, histograms: &[f64]) -> Result<EncodedBuffer>;

    /// Decode histogram frames received from the collective.
    ///
    /// # Errors
    /// Returns `SecAggError::CorruptBuffer` on malformed input.
    fn handle_histograms(&mut self, buffer: &[u8]) -> Result<Vec<f64>>;

    /// Hand a buffer back. Buffers this processor did not issue are logged
    /// and dropped.
    fn free_buffer(&mut self, buffer: EncodedBuffer);

    /// Current lifecycle phase.
    fn phase(&self) -> Phase;

    /// Soft-event counters.
    fn diagnostics(&self) -> SessionDiagnostics;

    /// Issued/released buffer counts.
    fn buffer_stats(&self) -> LedgerStats;
}
