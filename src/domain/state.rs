//! Connection lifecycle state

use std::fmt;

use serde::{Deserialize, Serialize};

/// Observable state of a connection manager.
///
/// `Enumerating` is never set by the connection manager itself; callers that
/// walk the device tree after connecting layer it on top of `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Retrying {
        attempt: u32,
    },
    Connected,
    Enumerating,
}

impl ConnectionState {
    /// Whether a socket is up (including the enumeration sub-state).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Enumerating)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Retrying { attempt } => write!(f, "retrying (attempt {})", attempt),
            Self::Connected => write!(f, "connected"),
            Self::Enumerating => write!(f, "enumerating"),
        }
    }
}

/// A state transition plus its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub message: String,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}
