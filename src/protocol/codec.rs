//! NUL-delimited codec for the console protocol.
//!
//! Every message on the wire is UTF-8 text terminated by a single 0x00 byte.
//! There is no length prefix and no maximum length: the buffer grows until a
//! delimiter arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::command::Command;

/// Message terminator.
pub const DELIMITER: u8 = 0x00;

/// The bytes between two delimiters. May be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage(Bytes);

impl RawMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for RawMessage {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

/// Codec splitting inbound bytes on NUL and writing NUL-terminated commands.
#[derive(Debug, Clone, Default)]
pub struct NulCodec {
    /// Bytes of the buffer already searched for a delimiter.
    next_index: usize,
}

impl NulCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for NulCodec {
    type Item = RawMessage;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let start = self.next_index.min(src.len());
        let Some(offset) = src[start..].iter().position(|&b| b == DELIMITER) else {
            self.next_index = src.len();
            return Ok(None);
        };

        self.next_index = 0;
        let message = src.split_to(start + offset).freeze();
        src.advance(1);
        Ok(Some(RawMessage(message)))
    }
}

impl Encoder<Command> for NulCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let text = item.to_string();
        if text.as_bytes().contains(&DELIMITER) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "command contains a NUL byte",
            ));
        }

        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(DELIMITER);
        Ok(())
    }
}

/// Receive buffer plus codec: accepts arbitrary read chunks and yields every
/// complete message exactly once, keeping any unterminated tail.
#[derive(Debug, Default)]
pub struct Framer {
    codec: NulCodec,
    buffer: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every delimiter-terminated message.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<RawMessage> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        // NulCodec::decode is infallible
        while let Ok(Some(message)) = self.codec.decode(&mut self.buffer) {
            messages.push(message);
        }
        messages
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec = NulCodec::new();
    }
}

/// Encode a command to its NUL-terminated wire form.
pub fn encode_command(command: Command) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    NulCodec::new().encode(command, &mut buf)?;
    Ok(buf.freeze())
}
