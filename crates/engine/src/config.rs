//! Engine configuration via `tailor.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Values are checked eagerly on load; a bad value is `InvalidInput`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tailor_concurrency::{LockTableConfig, LockWaitConfig};
use tailor_core::{IsolationProtocol, TailorError, TailorResult, DEFAULT_BUCKET_COUNT};
use tracing::debug;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "tailor.toml";

/// Lock wait policy, the `[lock_wait]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockWaitSettings {
    /// Waits before a WAIT outcome is treated as an abort
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Longest single wait for a release signal, in milliseconds
    #[serde(default = "default_one_ms")]
    pub retry_interval_ms: u64,
}

impl Default for LockWaitSettings {
    fn default() -> Self {
        LockWaitSettings {
            max_retries: default_max_retries(),
            retry_interval_ms: default_one_ms(),
        }
    }
}

/// Protocol switch barrier policy, the `[switch]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwitchSettings {
    /// Barrier wait slice in milliseconds
    #[serde(default = "default_one_ms")]
    pub poll_interval_ms: u64,
    /// Barrier wait after which a stall warning is logged, in milliseconds
    #[serde(default = "default_stall_warn_ms")]
    pub stall_warn_ms: u64,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        SwitchSettings {
            poll_interval_ms: default_one_ms(),
            stall_warn_ms: default_stall_warn_ms(),
        }
    }
}

impl SwitchSettings {
    /// Barrier wait slice
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stall warning threshold
    pub fn stall_warn(&self) -> Duration {
        Duration::from_millis(self.stall_warn_ms)
    }
}

/// Engine configuration loaded from `tailor.toml`
///
/// # Example
///
/// ```toml
/// initial_protocol = "si"
/// bucket_count = 4096
///
/// [lock_wait]
/// max_retries = 16
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Protocol at startup: `"ser"`, `"si"` or `"rc"`
    #[serde(default = "default_protocol_str")]
    pub initial_protocol: String,
    /// Lock-table buckets per relation
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,
    /// Bucket size above which stale entries are pruned
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: usize,
    /// Every N-th transaction validates all of its statements (0 = off)
    #[serde(default)]
    pub sample_every: u64,
    /// Lock wait policy
    #[serde(default)]
    pub lock_wait: LockWaitSettings,
    /// Switch barrier policy
    #[serde(default)]
    pub switch: SwitchSettings,
}

fn default_protocol_str() -> String {
    "ser".to_string()
}

fn default_bucket_count() -> usize {
    DEFAULT_BUCKET_COUNT
}

fn default_prune_threshold() -> usize {
    256
}

fn default_max_retries() -> u32 {
    64
}

fn default_one_ms() -> u64 {
    1
}

fn default_stall_warn_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_protocol: default_protocol_str(),
            bucket_count: default_bucket_count(),
            prune_threshold: default_prune_threshold(),
            sample_every: 0,
            lock_wait: LockWaitSettings::default(),
            switch: SwitchSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Config starting in `protocol`, everything else defaulted
    pub fn with_protocol(protocol: IsolationProtocol) -> Self {
        EngineConfig {
            initial_protocol: protocol.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Parse the initial protocol
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unknown protocol name.
    pub fn protocol(&self) -> TailorResult<IsolationProtocol> {
        self.initial_protocol.parse()
    }

    /// Check every value
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` describing the first bad value.
    pub fn validate(&self) -> TailorResult<()> {
        self.protocol()?;
        if self.bucket_count == 0 {
            return Err(TailorError::invalid_input("bucket_count must be greater than zero"));
        }
        if self.switch.poll_interval_ms == 0 {
            return Err(TailorError::invalid_input(
                "switch.poll_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Lock table settings derived from this config
    pub fn lock_table(&self) -> LockTableConfig {
        LockTableConfig {
            bucket_count: self.bucket_count,
            prune_threshold: self.prune_threshold,
            wait: LockWaitConfig {
                max_retries: self.lock_wait.max_retries,
                retry_interval: Duration::from_millis(self.lock_wait.retry_interval_ms),
            },
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tailor engine configuration
#
# Protocol at startup: "ser" (default), "si" or "rc"
#   "ser" = store-native serializable, no validation
#   "si"  = snapshot isolation plus commit-time validation
#   "rc"  = read committed plus commit-time validation
initial_protocol = "ser"

# Lock-table buckets per relation (default: 1024)
bucket_count = 1024

# Bucket size above which uncontended stale entries are pruned (default: 256)
prune_threshold = 256

# Validate every statement of every N-th transaction (default: 0 = off)
sample_every = 0

[lock_wait]
# Waits before a blocked lock request aborts (default: 64)
max_retries = 64
# Longest single wait for a release, in milliseconds (default: 1)
retry_interval_ms = 1

[switch]
# Barrier wait slice while a protocol switch is in progress (default: 1)
poll_interval_ms = 1
# Log a warning when a barrier has waited this long (default: 1000)
stall_warn_ms = 1000
"#
    }

    /// Parse and validate config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the text cannot be parsed or a value is bad.
    pub fn from_toml_str(content: &str) -> TailorResult<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| TailorError::invalid_input(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> TailorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TailorError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            TailorError::InvalidInput { reason } => TailorError::invalid_input(format!(
                "config file '{}': {}",
                path.display(),
                reason
            )),
            other => other,
        })?;
        debug!(target: "tailor::config", path = %path.display(), protocol = %config.initial_protocol, "Config loaded");
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> TailorResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                TailorError::internal(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
