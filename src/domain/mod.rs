//! Domain types for monitorctl
//!
//! This module contains the core value types shared by the client,
//! discovery and monitor layers:
//! - Endpoint / DiscoveredHost: where a console engine can be reached
//! - ProtocolEvent: one typed value decoded from the wire
//! - ConnectionState / ConnectionStatus: the observable connection lifecycle

pub mod endpoint;
pub mod event;
pub mod state;

pub use endpoint::{DEFAULT_PORT, DiscoveredHost, Endpoint};
pub use event::ProtocolEvent;
pub use state::{ConnectionState, ConnectionStatus};
