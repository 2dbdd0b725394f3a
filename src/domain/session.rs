//! Session state machine.
//!
//! ```text
//! Created --initialize--> Initialized --install_context--> ContextReady
//!    ^                         |                               |
//!    +--------shutdown---------+-------------------------------+
//! ```
//!
//! All mutable per-session data lives here, including the per-round cache
//! (last gradient pairs, feature-sent flag), so transitions can be exercised
//! without a scheme or a processor.

use zeroize::Zeroize;

use super::config::Params;
use super::context::{AggregationContext, ContextError};
use super::gh_pairs::GhPairs;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No session: before the first initialize or after shutdown.
    Created,
    Initialized,
    ContextReady,
}

/// State-machine violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{0} called before initialize")]
    NotInitialized(&'static str),

    #[error("initialize called on a live session; shut it down first")]
    AlreadyInitialized,

    #[error("{0} called before the aggregation context was established")]
    ContextNotReady(&'static str),

    #[error(transparent)]
    InvalidContext(#[from] ContextError),
}

/// Result of an `install_context` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextInstall {
    Installed,
    /// A context already existed; the new one was dropped.
    Ignored,
}

/// Counters for soft events a host or test may want to observe.
///
/// Survive shutdown; they describe the processor, not one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct SessionDiagnostics {
    pub sessions_started: u64,
    pub duplicate_context_inits: u64,
    pub shutdowns: u64,
}

/// Data that changes from round to round.
#[derive(Debug, Default)]
pub struct RoundState {
    /// Pairs of the current round, recorded by the gradient-pair codec.
    pub gh_pairs: Option<GhPairs>,
    /// Whether the feature layout already went out in this session.
    pub feature_sent: bool,
    /// Feature ids sent with the layout, computed once.
    pub features: Vec<i64>,
}

/// Complete state of one processor's session.
#[derive(Debug)]
pub struct SessionState {
    phase: Phase,
    active: bool,
    send_features: bool,
    params: Params,
    context: Option<AggregationContext>,
    round: RoundState,
    diagnostics: SessionDiagnostics,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Created,
            active: false,
            send_features: true,
            params: Params::new(),
            context: None,
            round: RoundState::default(),
            diagnostics: SessionDiagnostics::default(),
        }
    }

    /// Start a session.
    ///
    /// # Errors
    /// Returns `SessionError::AlreadyInitialized` if a session is live.
    pub fn initialize(
        &mut self,
        active: bool,
        params: Params,
        send_features: bool,
    ) -> Result<(), SessionError> {
        if self.phase != Phase::Created {
            return Err(SessionError::AlreadyInitialized);
        }
        self.phase = Phase::Initialized;
        self.active = active;
        self.send_features = send_features;
        self.params = params;
        self.diagnostics.sessions_started += 1;
        Ok(())
    }

    /// Establish the aggregation layout, once.
    ///
    /// A second call leaves the first layout in place, emits a
    /// `duplicate_context_init` warning event and bumps
    /// [`SessionDiagnostics::duplicate_context_inits`].
    ///
    /// # Errors
    /// Returns `SessionError` if no session is live or the first layout is
    /// invalid.
    pub fn install_context(
        &mut self,
        cuts: &[u32],
        slots: &[i32],
    ) -> Result<ContextInstall, SessionError> {
        self.require_initialized("init_aggregation_context")?;

        if self.context.is_some() {
            self.diagnostics.duplicate_context_inits += 1;
            tracing::warn!(
                event = "duplicate_context_init",
                count = self.diagnostics.duplicate_context_inits,
                "Aggregation context already established; keeping the first layout"
            );
            return Ok(ContextInstall::Ignored);
        }

        let context = AggregationContext::new(cuts.to_vec(), slots.to_vec())?;
        tracing::info!(
            features = context.num_features(),
            samples = context.num_samples(),
            total_bins = context.total_bins(),
            "Aggregation context established"
        );
        self.context = Some(context);
        self.phase = Phase::ContextReady;
        Ok(ContextInstall::Installed)
    }

    /// Tear the session down. Valid in every phase, any number of times.
    ///
    /// Returns `true` if a live session was ended.
    pub fn shutdown(&mut self) -> bool {
        let was_live = self.phase != Phase::Created;

        self.phase = Phase::Created;
        self.active = false;
        self.send_features = true;
        for value in self.params.values_mut() {
            value.zeroize();
        }
        self.params.clear();
        self.context = None;
        self.round = RoundState::default();

        if was_live {
            self.diagnostics.shutdowns += 1;
        }
        was_live
    }

    /// # Errors
    /// Returns `SessionError::NotInitialized` outside a live session.
    pub fn require_initialized(&self, op: &'static str) -> Result<(), SessionError> {
        match self.phase {
            Phase::Created => Err(SessionError::NotInitialized(op)),
            Phase::Initialized | Phase::ContextReady => Ok(()),
        }
    }

    /// The established layout.
    ///
    /// # Errors
    /// Returns `SessionError` unless the phase is `ContextReady`.
    pub fn require_context(&self, op: &'static str) -> Result<&AggregationContext, SessionError> {
        self.require_initialized(op)?;
        self.context
            .as_ref()
            .ok_or(SessionError::ContextNotReady(op))
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn send_features(&self) -> bool {
        self.send_features
    }

    #[must_use]
    pub fn context(&self) -> Option<&AggregationContext> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn round_mut(&mut self) -> &mut RoundState {
        &mut self.round
    }

    /// Layout and round cache together, for callers that read the former
    /// while updating the latter.
    ///
    /// # Errors
    /// Returns `SessionError` unless the phase is `ContextReady`.
    pub fn context_and_round(
        &mut self,
        op: &'static str,
    ) -> Result<(&AggregationContext, &mut RoundState), SessionError> {
        self.require_initialized(op)?;
        match &self.context {
            Some(context) => Ok((context, &mut self.round)),
            None => Err(SessionError::ContextNotReady(op)),
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> SessionDiagnostics {
        self.diagnostics
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_session() -> SessionState {
        let mut s = SessionState::new();
        s.initialize(true, Params::new(), true).expect("init");
        s.install_context(&[0, 2, 4], &[0, 2, 1, 3])
            .expect("context");
        s
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = SessionState::new();
        assert_eq!(s.phase(), Phase::Created);

        s.initialize(false, Params::new(), false).expect("init");
        assert_eq!(s.phase(), Phase::Initialized);
        assert!(!s.is_active());
        assert!(!s.send_features());

        assert_eq!(
            s.install_context(&[0, 3], &[0, 1, 2]).expect("context"),
            ContextInstall::Installed
        );
        assert_eq!(s.phase(), Phase::ContextReady);
        assert_eq!(s.require_context("test").expect("ready").num_samples(), 3);
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        let mut s = SessionState::new();
        assert_eq!(
            s.require_initialized("process_gh_pairs"),
            Err(SessionError::NotInitialized("process_gh_pairs"))
        );
        assert_eq!(
            s.install_context(&[0, 1], &[]),
            Err(SessionError::NotInitialized("init_aggregation_context"))
        );
        assert!(matches!(
            s.require_context("process_aggregation"),
            Err(SessionError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_context_required_after_initialize() {
        let mut s = SessionState::new();
        s.initialize(true, Params::new(), true).expect("init");
        assert_eq!(
            s.require_context("process_histograms").unwrap_err(),
            SessionError::ContextNotReady("process_histograms")
        );
        assert!(s.context_and_round("handle_aggregation").is_err());
    }

    #[test]
    fn test_duplicate_context_keeps_first() {
        let mut s = ready_session();
        let before = s.context().cloned();

        assert_eq!(
            s.install_context(&[0, 9], &[8, 7]).expect("ignored"),
            ContextInstall::Ignored
        );
        assert_eq!(s.context().cloned(), before);
        assert_eq!(s.diagnostics().duplicate_context_inits, 1);
    }

    #[test]
    fn test_invalid_first_context_is_rejected() {
        let mut s = SessionState::new();
        s.initialize(true, Params::new(), true).expect("init");
        assert!(matches!(
            s.install_context(&[0, 2], &[5]),
            Err(SessionError::InvalidContext(_))
        ));
        assert_eq!(s.phase(), Phase::Initialized);
    }

    #[test]
    fn test_reinitialize_rejected_until_shutdown() {
        let mut s = ready_session();
        assert_eq!(
            s.initialize(true, Params::new(), true),
            Err(SessionError::AlreadyInitialized)
        );
        s.shutdown();
        s.initialize(false, Params::new(), true).expect("fresh session");
        assert_eq!(s.diagnostics().sessions_started, 2);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut s = ready_session();
        s.round_mut().feature_sent = true;
        s.round_mut().gh_pairs = GhPairs::new(vec![1.0, 1.0]);

        assert!(s.shutdown());
        assert!(!s.shutdown());
        assert!(!s.shutdown());

        assert_eq!(s.phase(), Phase::Created);
        assert!(s.context().is_none());
        assert!(s.round().gh_pairs.is_none());
        assert!(!s.round().feature_sent);
        assert!(s.params.is_empty());
        assert_eq!(s.diagnostics().shutdowns, 1);
    }

    #[test]
    fn test_shutdown_without_session() {
        let mut s = SessionState::new();
        assert!(!s.shutdown());
        assert_eq!(s.phase(), Phase::Created);
    }
}
