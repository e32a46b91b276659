//! monitorctl - Monitor control for UA Console mixer engines
//!
//! A client for the engine's NUL-delimited JSON control protocol, with
//! automatic reconnection, mDNS discovery of engines on the local network
//! and a monitor-section controller built on top.

pub mod client;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod protocol;

pub use error::{MonitorError, Result};
