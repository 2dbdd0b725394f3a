//! # Histoseal
//!
//! Secure-aggregation boundary for federated gradient boosting.
//!
//! This crate provides:
//! - A processor that encodes gradient pairs, row partitions and histograms
//!   into opaque buffers before they cross a party boundary
//! - Decoding of the aggregated buffers received back from the collective
//! - Pluggable schemes (plaintext framing, AES-256-GCM envelope)
//! - A reference peer aggregator for rehearsals and tests
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (frames, aggregation context, session state, buffers)
//! - `ports`: Trait definitions (`Processor`, `Scheme`)
//! - `adapters`: Concrete schemes and log sanitization
//! - `application`: The processor and the peer aggregator

pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;

pub use application::{HistogramAggregator, SecureProcessor};
pub use domain::{EncodedBuffer, NodePartition, Params, Phase};
pub use ports::{Processor, Scheme};

use domain::config::ConfigError;
use domain::{CryptoError, SessionError, WireError};

/// Result type for Histoseal operations
pub type Result<T> = std::result::Result<T, SecAggError>;

/// Main error type for Histoseal
#[derive(Debug, thiserror::Error)]
pub enum SecAggError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Corrupt buffer: {0}")]
    CorruptBuffer(String),

    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Invalid aggregation context: {0}")]
    InvalidContext(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(CryptoError),
}

impl From<WireError> for SecAggError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Allocation(msg) => Self::AllocationFailure(msg),
            other => Self::CorruptBuffer(other.to_string()),
        }
    }
}

impl From<CryptoError> for SecAggError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Framing(wire) => wire.into(),
            CryptoError::Allocation(msg) => Self::AllocationFailure(msg),
            CryptoError::Authentication | CryptoError::MalformedEnvelope(_) => {
                Self::CorruptBuffer(err.to_string())
            }
            CryptoError::KeyDerivation(_) | CryptoError::Seal(_) => Self::Crypto(err),
        }
    }
}

impl From<SessionError> for SecAggError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidContext(inner) => Self::InvalidContext(inner.to_string()),
            other => Self::InvalidState(other.to_string()),
        }
    }
}
