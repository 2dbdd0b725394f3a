//! Domain layer: Core types and logic.
//!
//! Pure Rust types describing what crosses the party boundary and the
//! session that governs it. Nothing here knows which scheme is in use.

pub mod aggregation;
pub mod buffer;
pub mod config;
pub mod context;
mod crypto;
pub mod frame;
mod gh_pairs;
pub mod histogram;
pub mod kdf;
pub mod session;

pub use aggregation::{
    AggregationRequest, AggregationResult, FeatureLayout, NodeHistogram, NodePartition, NodeRows,
};
pub use buffer::{BufferLedger, EncodedBuffer, LedgerStats, Release};
pub use config::{Params, ProcessorConfig, SchemeKind};
pub use context::{AggregationContext, ContextError, MISSING_SLOT};
pub use crypto::{CryptoError, SessionKey};
pub use frame::{DataSet, WireError};
pub use gh_pairs::GhPairs;
pub use session::{ContextInstall, Phase, SessionDiagnostics, SessionError, SessionState};
