//! Fake console engine for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use monitorctl::client::SinkMessage;
use monitorctl::domain::{ConnectionState, ConnectionStatus, Endpoint};
use monitorctl::protocol::Framer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Listening fake engine on an ephemeral loopback port.
pub struct FakeConsole {
    listener: TcpListener,
}

impl FakeConsole {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.listener.local_addr().unwrap().port())
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for client")
            .unwrap();
        Peer {
            stream,
            framer: Framer::new(),
            pending: VecDeque::new(),
        }
    }
}

/// Server side of one client connection.
pub struct Peer {
    stream: TcpStream,
    framer: Framer,
    pending: VecDeque<String>,
}

impl Peer {
    /// Next NUL-terminated command from the client.
    pub async fn recv(&mut self) -> String {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return message;
            }
            let mut buf = [0u8; 4096];
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for command")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            for message in self.framer.feed(&buf[..n]) {
                self.pending
                    .push_back(String::from_utf8(message.as_bytes().to_vec()).unwrap());
            }
        }
    }

    /// Send one message followed by the delimiter.
    pub async fn push(&mut self, json: &str) {
        self.write_raw(json.as_bytes()).await;
        self.write_raw(&[0]).await;
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        // The client may already have dropped this socket
        let _ = self.stream.write_all(bytes).await;
        let _ = self.stream.flush().await;
    }
}

pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<SinkMessage>) -> SinkMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for sink message")
        .expect("sink closed")
}

/// Skip ahead to the next status in `state`.
pub async fn wait_status(rx: &mut mpsc::UnboundedReceiver<SinkMessage>, state: ConnectionState) -> ConnectionStatus {
    loop {
        if let SinkMessage::Status(status) = next_message(rx).await
            && status.state == state
        {
            return status;
        }
    }
}

/// Assert nothing arrives within `window`.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<SinkMessage>, window: Duration) {
    if let Ok(Some(message)) = timeout(window, rx.recv()).await {
        panic!("unexpected sink message: {:?}", message);
    }
}
