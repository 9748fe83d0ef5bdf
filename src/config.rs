//! WolfSync Configuration
//!
//! This module provides configuration structures for the WolfSync
//! content replication manager.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfSyncConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Registry gateway configuration (identity resolution)
    pub registry: RegistryConfig,

    /// Discovery provider configuration
    pub discovery: DiscoveryConfig,

    /// Replication state machine configuration
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's public endpoint, as registered with the fleet registry
    pub endpoint: String,

    /// Data directory for persistent state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Known service provider id for this endpoint (0 = resolve from registry)
    #[serde(default)]
    pub service_provider_id: u64,
}

/// Registry gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry gateway base URL
    pub endpoint: String,
}

/// Discovery provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Ordered list of discovery provider base URLs
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Replication state machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Whether this node participates in replication at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base value used to slice the user population across cycles
    #[serde(default = "default_modulo_base")]
    pub modulo_base: u64,

    /// Maximum number of sync jobs executing concurrently
    #[serde(default = "default_max_parallel_sync_jobs")]
    pub max_parallel_sync_jobs: usize,

    /// Maximum time to monitor a single sync operation, in milliseconds
    #[serde(default = "default_max_monitoring_duration_ms")]
    pub max_monitoring_duration_ms: u64,

    /// Delay between sync status polls during monitoring, in milliseconds
    #[serde(default = "default_monitoring_retry_delay_ms")]
    pub monitoring_retry_delay_ms: u64,

    /// Delay between replication cycles in production, in milliseconds
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,

    /// Use the short development-mode cycle delay instead
    #[serde(default)]
    pub dev_mode: bool,

    /// Delay between replication cycles in development mode, in milliseconds
    #[serde(default = "default_dev_cycle_delay_ms")]
    pub dev_cycle_delay_ms: u64,

    /// Timeout for individual outbound HTTP requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Operator API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable the HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address the HTTP API binds to
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS on API responses
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional log file; stderr when unset
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfsync")
}

fn default_modulo_base() -> u64 {
    24
}

fn default_max_parallel_sync_jobs() -> usize {
    10
}

fn default_max_monitoring_duration_ms() -> u64 {
    360_000
}

fn default_monitoring_retry_delay_ms() -> u64 {
    15_000
}

fn default_cycle_delay_ms() -> u64 {
    3_600_000
}

fn default_dev_cycle_delay_ms() -> u64 {
    3_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            modulo_base: default_modulo_base(),
            max_parallel_sync_jobs: default_max_parallel_sync_jobs(),
            max_monitoring_duration_ms: default_max_monitoring_duration_ms(),
            monitoring_retry_delay_ms: default_monitoring_retry_delay_ms(),
            cycle_delay_ms: default_cycle_delay_ms(),
            dev_mode: false,
            dev_cycle_delay_ms: default_dev_cycle_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl WolfSyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WolfSyncConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.endpoint.is_empty() {
            return Err(crate::Error::Config("node.endpoint cannot be empty".into()));
        }

        if self.registry.endpoint.is_empty() {
            return Err(crate::Error::Config("registry.endpoint cannot be empty".into()));
        }

        if self.replication.enabled && self.discovery.providers.is_empty() {
            return Err(crate::Error::Config(
                "discovery.providers cannot be empty while replication is enabled".into(),
            ));
        }

        if self.replication.modulo_base == 0 {
            return Err(crate::Error::Config("replication.modulo_base must be at least 1".into()));
        }

        if self.replication.max_parallel_sync_jobs == 0 {
            return Err(crate::Error::Config(
                "replication.max_parallel_sync_jobs must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> PathBuf {
        self.node.data_dir.join("state")
    }

    /// Get the delay between replication cycles (dev mode aware)
    pub fn cycle_delay(&self) -> Duration {
        if self.replication.dev_mode {
            Duration::from_millis(self.replication.dev_cycle_delay_ms)
        } else {
            Duration::from_millis(self.replication.cycle_delay_ms)
        }
    }

    /// Get the maximum sync monitoring duration as Duration
    pub fn max_monitoring_duration(&self) -> Duration {
        Duration::from_millis(self.replication.max_monitoring_duration_ms)
    }

    /// Get the sync monitoring retry delay as Duration
    pub fn monitoring_retry_delay(&self) -> Duration {
        Duration::from_millis(self.replication.monitoring_retry_delay_ms)
    }

    /// Get the outbound HTTP request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.replication.request_timeout_secs)
    }
}
