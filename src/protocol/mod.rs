//! Wire protocol for the console engine
//!
//! This module provides:
//! - NUL-delimited framing over a TCP byte stream
//! - Decoding of one JSON message into typed protocol events
//! - Outbound command encoding (get / set / subscribe)

pub mod codec;
pub mod command;
pub mod decode;

pub use codec::{DELIMITER, Framer, NulCodec, RawMessage};
pub use command::{Command, CommandValue};
pub use decode::decode;
