//! Monitor-section control on top of the protocol client
//!
//! This module provides:
//! - MonitorController: device/output enumeration and monitor actions
//! - MonitorState and the StateSink fan-out
//! - SnapshotStore: key-value JSON snapshot for other processes
//! - HostBook: manually entered hosts and the selected endpoint

pub mod controller;
pub mod hosts;
pub mod state;
pub mod store;

pub use controller::{MONITOR_PROPERTIES, MonitorConfig, MonitorController};
pub use hosts::HostBook;
pub use state::{Fanout, MonitorState, StateSink, db_to_volume, format_level, volume_to_db};
pub use store::SnapshotStore;
