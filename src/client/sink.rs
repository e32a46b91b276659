//! Caller-facing event sink.

use tokio::sync::mpsc;

use crate::domain::{ConnectionStatus, ProtocolEvent};

/// Receives everything a connection manager reports.
///
/// All methods are called from the manager's single dispatcher task, in
/// order, and never for a connection that has since been replaced or
/// disconnected. Implementations may call back into the manager.
pub trait EventSink: Send + Sync + 'static {
    /// A decoded protocol event.
    fn on_event(&self, event: ProtocolEvent);

    /// A connection state change with a human-readable message.
    fn on_status(&self, status: ConnectionStatus);

    /// An established connection was lost. Delivered before the matching
    /// `on_status`.
    fn on_disconnected(&self) {}
}

/// Everything an [`EventSink`] can receive, as one value.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkMessage {
    Event(ProtocolEvent),
    Status(ConnectionStatus),
    Disconnected,
}

/// Sink that forwards into a channel, for callers that prefer to `await`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: ProtocolEvent) {
        let _ = self.tx.send(SinkMessage::Event(event));
    }

    fn on_status(&self, status: ConnectionStatus) {
        let _ = self.tx.send(SinkMessage::Status(status));
    }

    fn on_disconnected(&self) {
        let _ = self.tx.send(SinkMessage::Disconnected);
    }
}
