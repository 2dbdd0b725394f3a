//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `plaintext`: identity framing
//! - `aes_gcm`: aes-gcm + argon2 for the shared-key envelope
//! - `sanitize`: secret filtering for logs

pub mod aes_gcm;
pub mod plaintext;
pub mod sanitize;

use crate::domain::config::ConfigError;
use crate::domain::{ProcessorConfig, SchemeKind};
use crate::ports::Scheme;

pub use aes_gcm::AesGcmScheme;
pub use plaintext::PlaintextScheme;

/// Build the scheme named by `config`.
///
/// Key derivation for keyed schemes happens here, once per session.
///
/// # Errors
/// Returns `SecAggError::Config` if a keyed scheme lacks its settings and
/// `SecAggError::Crypto` if key derivation fails.
pub fn build_scheme(config: &ProcessorConfig) -> crate::Result<Box<dyn Scheme>> {
    let scheme: Box<dyn Scheme> = match config.scheme {
        SchemeKind::Plaintext => Box::new(PlaintextScheme),
        SchemeKind::AesGcm => {
            let settings = config
                .aes_gcm
                .as_ref()
                .ok_or(ConfigError::Missing(crate::domain::config::PASSPHRASE_KEY))?;
            Box::new(AesGcmScheme::from_settings(settings)?)
        }
    };
    tracing::debug!(scheme = scheme.name(), "Scheme selected");
    Ok(scheme)
}
