//! WolfSync Error Types

use thiserror::Error;

/// Result type alias for WolfSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Registry / identity errors
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Node endpoint {0} is not registered (service provider id 0)")]
    Unregistered(String),

    // Discovery errors
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("No discovery provider currently selected")]
    DiscoveryUnavailable,

    // Peer communication errors
    #[error("Peer request failed: {0}")]
    Peer(#[from] reqwest::Error),

    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("Sync request to {endpoint} rejected with status {status}")]
    SyncRejected { endpoint: String, status: u16 },

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Replication is disabled for this node")]
    ReplicationDisabled,

    // Queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Invalid job payload: {0}")]
    JobPayload(#[from] serde_json::Error),

    // State errors
    #[error("State error: {0}")]
    State(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error should end the current cycle early while leaving
    /// the orchestrator loop running (retried on the next scheduled cycle)
    pub fn skips_cycle(&self) -> bool {
        matches!(
            self,
            Error::Unregistered(_)
                | Error::DiscoveryUnavailable
                | Error::Discovery(_)
                | Error::Registry(_)
        )
    }

    /// Check if this error is retryable on a later cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Peer(_)
                | Error::Network(_)
                | Error::Discovery(_)
                | Error::DiscoveryUnavailable
                | Error::Registry(_)
        )
    }
}
