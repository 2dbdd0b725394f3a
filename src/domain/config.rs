//! Typed view over the string parameters passed at initialization.
//!
//! Recognized keys:
//!
//! | key | default |
//! | --- | --- |
//! | `secagg.scheme` | `plaintext` (`plaintext` or `aes-gcm`) |
//! | `secagg.send_features` | `true` |
//! | `secagg.aes_gcm.passphrase` | `HISTOSEAL_PASSPHRASE` env var |
//! | `secagg.aes_gcm.salt` | required for `aes-gcm` |
//! | `secagg.aes_gcm.kdf_memory_kib` | [`DEFAULT_MEMORY_KIB`] |
//!
//! Any other key is ignored so hosts can pass their full parameter map.

use std::collections::BTreeMap;
use std::str::FromStr;

use zeroize::Zeroizing;

use super::kdf::DEFAULT_MEMORY_KIB;

/// Parameter map handed over by the host.
pub type Params = BTreeMap<String, String>;

pub const SCHEME_KEY: &str = "secagg.scheme";
pub const SEND_FEATURES_KEY: &str = "secagg.send_features";
pub const PASSPHRASE_KEY: &str = "secagg.aes_gcm.passphrase";
pub const SALT_KEY: &str = "secagg.aes_gcm.salt";
pub const KDF_MEMORY_KEY: &str = "secagg.aes_gcm.kdf_memory_kib";

/// Environment fallback for the passphrase, so it need not sit in the
/// host's parameter map.
pub const PASSPHRASE_ENV: &str = "HISTOSEAL_PASSPHRASE";

const KNOWN_KEYS: [&str; 5] = [
    SCHEME_KEY,
    SEND_FEATURES_KEY,
    PASSPHRASE_KEY,
    SALT_KEY,
    KDF_MEMORY_KEY,
];

/// Errors in the parameter map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown scheme: {0} (expected plaintext or aes-gcm)")]
    UnknownScheme(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Missing required parameter {0}")]
    Missing(&'static str),
}

/// Transform applied to frames before they leave the party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemeKind {
    /// Frames travel as-is.
    #[default]
    Plaintext,
    /// AES-256-GCM envelope under a key shared by all parties.
    AesGcm,
}

impl SchemeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "plaintext",
            Self::AesGcm => "aes-gcm",
        }
    }
}

impl FromStr for SchemeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plaintext" | "none" => Ok(Self::Plaintext),
            "aes-gcm" | "aes_gcm" | "aes256-gcm" => Ok(Self::AesGcm),
            other => Err(ConfigError::UnknownScheme(other.to_string())),
        }
    }
}

impl std::fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key material inputs for the AES-GCM scheme.
#[derive(Clone)]
pub struct AesGcmSettings {
    pub passphrase: Zeroizing<String>,
    pub salt: String,
    pub memory_kib: u32,
}

impl std::fmt::Debug for AesGcmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmSettings")
            .field("passphrase", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .field("memory_kib", &self.memory_kib)
            .finish()
    }
}

/// Parsed processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub scheme: SchemeKind,
    /// Send the feature list and row bins with the first aggregation request.
    pub send_features: bool,
    /// Present iff `scheme` is `AesGcm`.
    pub aes_gcm: Option<AesGcmSettings>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            scheme: SchemeKind::Plaintext,
            send_features: true,
            aes_gcm: None,
        }
    }
}

impl ProcessorConfig {
    /// Parse `params`, falling back to the process environment for the
    /// passphrase.
    ///
    /// # Errors
    /// Returns `ConfigError` for unknown schemes, unparsable values or
    /// missing key material.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        Self::from_params_with_env(params, |name| std::env::var(name).ok())
    }

    /// Parse `params` with an explicit environment lookup.
    ///
    /// # Errors
    /// See [`ProcessorConfig::from_params`].
    pub fn from_params_with_env<E>(params: &Params, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        for key in params.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            tracing::debug!(key = %key, "Ignoring unrecognized processor parameter");
        }

        let scheme = match params.get(SCHEME_KEY) {
            Some(v) => v.parse()?,
            None => SchemeKind::default(),
        };

        let send_features = match params.get(SEND_FEATURES_KEY) {
            Some(v) => parse_bool(SEND_FEATURES_KEY, v)?,
            None => true,
        };

        let aes_gcm = match scheme {
            SchemeKind::Plaintext => None,
            SchemeKind::AesGcm => {
                let passphrase = params
                    .get(PASSPHRASE_KEY)
                    .cloned()
                    .or_else(|| env(PASSPHRASE_ENV))
                    .filter(|p| !p.is_empty())
                    .ok_or(ConfigError::Missing(PASSPHRASE_KEY))?;
                let salt = params
                    .get(SALT_KEY)
                    .cloned()
                    .ok_or(ConfigError::Missing(SALT_KEY))?;
                let memory_kib = match params.get(KDF_MEMORY_KEY) {
                    Some(v) => v.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                        key: KDF_MEMORY_KEY,
                        value: v.clone(),
                    })?,
                    None => DEFAULT_MEMORY_KIB,
                };
                Some(AesGcmSettings {
                    passphrase: Zeroizing::new(passphrase),
                    salt,
                    memory_kib,
                })
            }
        };

        Ok(Self {
            scheme,
            send_features,
            aes_gcm,
        })
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
