//! Configuration types for urlseal.
//!
//! Every component takes its settings as an explicit value at
//! construction; nothing is read from process-wide state.  The same
//! types deserialize from YAML so a host (or the bundled CLI) can keep
//! them in a file:
//!
//! ```yaml
//! signer:
//!   salt: "3f9c..."
//!   hash_parameter: h
//!   scheme: hmac-sha256
//! expiry:
//!   time_parameter: t
//!   valid_for_seconds: 86400
//! cors:
//!   allowed_origins: ["https://example.org", "http://localhost:*"]
//! ```

use std::fmt;
use std::path::Path;

use garde::Validate;
use serde::Deserialize;

use crate::errors::{Result, SealError};
use crate::signer::DigestScheme;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// URL signing settings.
    #[serde(default)]
    #[garde(dive)]
    pub signer: SignerConfig,

    /// URL expiry settings.
    #[serde(default)]
    #[garde(dive)]
    pub expiry: ExpiryConfig,

    /// Cross-origin settings.
    #[serde(default)]
    #[garde(dive)]
    pub cors: CorsConfig,

    /// Content-Security-Policy settings.
    #[serde(default)]
    #[garde(dive)]
    pub csp: CspConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,
}

/// Key material.  Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Salt(String);

impl Salt {
    /// Wrap `value`, rejecting an empty salt.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(SealError::invalid_state("salt must not be empty"));
        }
        Ok(Self(value))
    }

    /// Generate a fresh 32-byte salt, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Signer settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignerConfig {
    /// Shared secret.  Required; the default is empty and is rejected
    /// when a signer is built from it, so a CLI flag can still supply it.
    #[serde(default)]
    #[garde(skip)]
    pub salt: Salt,

    /// Name of the query parameter carrying the hash.
    #[serde(default = "default_hash_parameter")]
    #[garde(pattern(r"^[A-Za-z0-9_.~\-]+$"))]
    pub hash_parameter: String,

    /// Digest construction.
    #[serde(default)]
    #[garde(skip)]
    pub scheme: DigestScheme,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            salt: Salt::default(),
            hash_parameter: default_hash_parameter(),
            scheme: DigestScheme::default(),
        }
    }
}

/// Expiry settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExpiryConfig {
    /// Name of the query parameter carrying the issue time.
    #[serde(default = "default_time_parameter")]
    #[garde(pattern(r"^[A-Za-z0-9_.~\-]+$"))]
    pub time_parameter: String,

    /// Default validity window used by the CLI `check` command.
    #[serde(default = "default_valid_for_seconds")]
    #[garde(range(min = 1))]
    pub valid_for_seconds: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            time_parameter: default_time_parameter(),
            valid_for_seconds: default_valid_for_seconds(),
        }
    }
}

/// Cross-origin settings.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CorsConfig {
    /// Origins allowed to receive an `Access-Control-Allow-Origin` echo.
    /// A trailing `:*` matches any port.
    #[serde(default)]
    #[garde(inner(length(min = 1)))]
    pub allowed_origins: Vec<String>,
}

/// Content-Security-Policy settings.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CspConfig {
    /// Policy merged into every response.
    #[serde(default)]
    #[garde(skip)]
    pub policy: String,

    /// Path prefixes the policy is not applied to.
    #[serde(default)]
    #[garde(inner(length(min = 1)))]
    pub excluded_paths: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    #[garde(pattern(r"^(trace|debug|info|warn|error)$"))]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    #[garde(pattern(r"^(text|json)$"))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_hash_parameter() -> String {
    "h".to_string()
}

fn default_time_parameter() -> String {
    "t".to_string()
}

fn default_valid_for_seconds() -> u64 {
    86_400 // one day
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))?;
    Ok(config)
}
