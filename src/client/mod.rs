//! Protocol client for the console engine
//!
//! This module provides:
//! - ConnectionManager: socket lifecycle, receive loop, keep-alive, commands
//! - ReconnectPolicy: capped exponential backoff
//! - EventSink: the caller-implemented callback interface

pub mod connection;
pub mod reconnect;
pub mod sink;

pub use connection::{ClientConfig, ConnectionManager, KEEP_ALIVE_PATH};
pub use reconnect::ReconnectPolicy;
pub use sink::{ChannelSink, EventSink, SinkMessage};
