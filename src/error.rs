//! Error types for monitorctl
//!
//! Centralized error handling using thiserror. Transport failures are normally
//! reported through the connection status callback rather than returned; the
//! variants here cover the synchronous surface (sending, storage, hosts).

use thiserror::Error;

/// All error types that can occur in monitorctl
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No socket is open for the connection manager
    #[error("Not connected")]
    NotConnected,

    /// Wire protocol misuse on the sending side
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Service browsing or resolution failure
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A monitor action was requested before an output was selected
    #[error("No monitor output selected")]
    NoOutput,

    /// A relative monitor action needs a value the engine has not reported yet
    #[error("Current {0} not reported by the engine yet")]
    NotReported(String),

    /// Host address could not be used
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// Snapshot persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for monitorctl operations
pub type Result<T> = std::result::Result<T, MonitorError>;
