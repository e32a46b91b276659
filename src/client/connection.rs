//! Connection manager for one console engine.
//!
//! Owns the socket lifecycle:
//! - connect / disconnect, with per-connection generation tagging
//! - the receive loop (framer + decoder) and the outbound write queue
//! - keep-alive ticking while connected
//! - the failure path and backoff-driven reconnects
//!
//! All mutable state sits behind one mutex. Sink callbacks are queued while
//! that lock is held and delivered by a single dispatcher task. Protocol
//! events are dropped once their connection generation is superseded; status
//! and disconnect notifications are dropped once the caller has started a new
//! session with `connect`, `reconnect` or `disconnect`, so the ones queued on
//! the way into an automatic retry are still delivered.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::reconnect::ReconnectPolicy;
use super::sink::EventSink;
use crate::domain::{ConnectionState, ConnectionStatus, Endpoint, ProtocolEvent};
use crate::error::{MonitorError, Result};
use crate::protocol::codec::encode_command;
use crate::protocol::{Command, CommandValue, Framer, decode};

/// Path queried by the keep-alive ticker.
pub const KEEP_ALIVE_PATH: &str = "/devices";

const READ_CHUNK: usize = 64 * 1024;

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interval between keep-alive queries while connected.
    pub keep_alive_interval: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// How long a TCP connect may take before it counts as unreachable.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Set the keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the reconnect backoff base and cap
    pub fn with_reconnect(mut self, base: Duration, max_delay: Duration) -> Self {
        self.reconnect_base = base;
        self.max_reconnect_delay = max_delay;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A queued sink callback.
enum Dispatch {
    Event(ProtocolEvent),
    Status(ConnectionStatus),
    Disconnected,
}

struct Envelope {
    generation: u64,
    session: u64,
    dispatch: Dispatch,
}

/// State guarded by the manager's single lock.
struct Shared {
    generation: u64,
    /// Bumped by caller-driven connects and disconnects, not by retries
    session: u64,
    state: ConnectionState,
    endpoint: Option<Endpoint>,
    framer: Framer,
    outgoing: Option<mpsc::UnboundedSender<Bytes>>,
    connection: Option<JoinHandle<()>>,
    keep_alive: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    policy: ReconnectPolicy,
    intentional_disconnect: bool,
    dispatch: Option<mpsc::UnboundedSender<Envelope>>,
}

impl Shared {
    fn emit(&self, dispatch: Dispatch) {
        if let Some(tx) = &self.dispatch {
            let _ = tx.send(Envelope {
                generation: self.generation,
                session: self.session,
                dispatch,
            });
        }
    }

    fn set_status(&mut self, state: ConnectionState, message: impl Into<String>) {
        self.state = state;
        self.emit(Dispatch::Status(ConnectionStatus::new(state, message)));
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn stop_keep_alive(&mut self) {
        if let Some(ticker) = self.keep_alive.take() {
            ticker.abort();
        }
    }

    fn close_socket(&mut self) {
        self.outgoing = None;
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
    }

    fn release_all(&mut self) {
        self.cancel_reconnect_timer();
        self.stop_keep_alive();
        self.close_socket();
    }
}

struct Inner {
    config: ClientConfig,
    shared: Mutex<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .release_all();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn accepts(&self, envelope: &Envelope) -> bool {
        let shared = self.lock();
        match envelope.dispatch {
            Dispatch::Event(_) => envelope.generation == shared.generation,
            Dispatch::Status(_) | Dispatch::Disconnected => envelope.session == shared.session,
        }
    }

    fn connect_locked(self: &Arc<Self>, shared: &mut Shared, endpoint: Endpoint) {
        shared.release_all();
        shared.generation += 1;
        shared.framer.reset();
        shared.intentional_disconnect = false;
        shared.endpoint = Some(endpoint.clone());

        let generation = shared.generation;
        let (tx, rx) = mpsc::unbounded_channel();
        shared.outgoing = Some(tx);
        shared.set_status(ConnectionState::Connecting, format!("Connecting to {}…", endpoint));
        info!("Connecting to {} (generation {})", endpoint, generation);

        shared.connection = Some(tokio::spawn(run_connection(
            Arc::downgrade(self),
            generation,
            endpoint,
            self.config.connect_timeout,
            rx,
        )));
    }

    fn disconnect(&self) {
        let mut shared = self.lock();
        shared.intentional_disconnect = true;
        shared.release_all();
        shared.generation += 1;
        shared.session += 1;
        shared.framer.reset();
        shared.state = ConnectionState::Disconnected;
        info!("Disconnected (generation {})", shared.generation);
    }

    fn mark_ready(self: &Arc<Self>, generation: u64) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }

        shared.policy.reset();
        shared.stop_keep_alive();
        shared.keep_alive = Some(tokio::spawn(keep_alive(
            Arc::downgrade(self),
            generation,
            self.config.keep_alive_interval,
        )));

        let host = shared
            .endpoint
            .as_ref()
            .map(|e| e.address.clone())
            .unwrap_or_default();
        info!("Connected to {}", host);
        shared.set_status(ConnectionState::Connected, format!("Connected to {}", host));
        true
    }

    /// Feed a read chunk through the framer and decoder. Returns false when
    /// the connection has been superseded.
    fn ingest(&self, generation: u64, bytes: &[u8]) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }

        for message in shared.framer.feed(bytes) {
            if message.is_empty() {
                continue;
            }
            for event in decode(message.as_bytes()) {
                shared.emit(Dispatch::Event(event));
            }
        }
        true
    }

    fn handle_failure(self: &Arc<Self>, generation: u64, message: String) {
        let mut shared = self.lock();
        if shared.generation != generation {
            debug!("Ignoring failure from stale connection: {}", message);
            return;
        }

        let was_connected = shared.state.is_connected();
        // Reported from the connection task itself, which is about to return
        drop(shared.connection.take());
        shared.outgoing = None;
        shared.stop_keep_alive();
        warn!("{}", message);

        if was_connected {
            shared.emit(Dispatch::Disconnected);
        }
        shared.set_status(ConnectionState::Disconnected, message);
        self.schedule_retry_locked(&mut shared);
    }

    fn schedule_retry_locked(self: &Arc<Self>, shared: &mut Shared) {
        if shared.intentional_disconnect {
            return;
        }
        if shared.endpoint.is_none() {
            debug!("No endpoint to retry");
            return;
        }

        shared.cancel_reconnect_timer();
        let (attempt, delay) = shared.policy.next_attempt();
        let generation = shared.generation;
        let weak = Arc::downgrade(self);
        shared.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_retry(generation);
            }
        }));

        debug!("Reconnect attempt {} scheduled in {:?}", attempt, delay);
        shared.set_status(
            ConnectionState::Retrying { attempt },
            format!("Retrying in {}… (attempt {})", format_delay(delay), attempt),
        );
    }

    fn fire_retry(self: &Arc<Self>, generation: u64) {
        let mut shared = self.lock();
        if shared.generation != generation || shared.intentional_disconnect {
            return;
        }
        // Runs on the timer task: detach the handle instead of aborting it
        drop(shared.reconnect_timer.take());
        if let Some(endpoint) = shared.endpoint.clone() {
            self.connect_locked(&mut shared, endpoint);
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        let frame = encode_command(command).map_err(|e| MonitorError::Protocol(e.to_string()))?;
        let shared = self.lock();
        let tx = shared.outgoing.as_ref().ok_or(MonitorError::NotConnected)?;
        tx.send(frame).map_err(|_| MonitorError::NotConnected)
    }
}

/// Client for one console engine. Cheap to clone; clones share the socket.
///
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager delivering callbacks to `sink`.
    pub fn new(config: ClientConfig, sink: Arc<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::new(config.reconnect_base, config.max_reconnect_delay);
        let inner = Arc::new(Inner {
            config,
            shared: Mutex::new(Shared {
                generation: 0,
                session: 0,
                state: ConnectionState::Disconnected,
                endpoint: None,
                framer: Framer::new(),
                outgoing: None,
                connection: None,
                keep_alive: None,
                reconnect_timer: None,
                policy,
                intentional_disconnect: false,
                dispatch: Some(tx),
            }),
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), sink, rx));
        Self { inner }
    }

    /// Open a connection to `endpoint`, replacing any existing one.
    ///
    /// Returns immediately; progress is reported through the sink.
    pub fn connect(&self, endpoint: Endpoint) {
        let mut shared = self.inner.lock();
        shared.session += 1;
        self.inner.connect_locked(&mut shared, endpoint);
    }

    /// Manual retry: reset the backoff counter and reconnect to the last
    /// endpoint.
    pub fn reconnect(&self) -> Result<()> {
        let mut shared = self.inner.lock();
        let endpoint = shared.endpoint.clone().ok_or(MonitorError::NotConnected)?;
        shared.policy.reset();
        shared.session += 1;
        self.inner.connect_locked(&mut shared, endpoint);
        Ok(())
    }

    /// Close the connection and suppress automatic reconnects.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Disconnect and stop the dispatcher. The sink receives nothing further.
    pub fn shutdown(&self) {
        self.inner.disconnect();
        self.inner.lock().dispatch = None;
    }

    /// Schedule a reconnect with backoff. No-op after an intentional
    /// disconnect.
    pub fn schedule_retry(&self) {
        let mut shared = self.inner.lock();
        self.inner.schedule_retry_locked(&mut shared);
    }

    /// Reset the backoff counter so the next retry waits the base delay.
    pub fn reset_reconnect_counter(&self) {
        self.inner.lock().policy.reset();
    }

    /// Queue a command for the socket.
    pub fn send(&self, command: Command) -> Result<()> {
        trace!("Sending: {}", command);
        self.inner.send(command)
    }

    /// Request the current value or children of `path`.
    pub fn get(&self, path: &str) -> Result<()> {
        self.send(Command::get(path))
    }

    /// Write a value to `path`.
    pub fn set(&self, path: &str, value: impl Into<CommandValue>) -> Result<()> {
        self.send(Command::set(path, value))
    }

    /// Ask for push updates on `path`.
    pub fn subscribe(&self, path: &str) -> Result<()> {
        self.send(Command::subscribe(path))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Endpoint of the current (or last) connection.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().endpoint.clone()
    }

    /// Current connection generation.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Current reconnect attempt count.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().policy.attempt()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &shared.state)
            .field("endpoint", &shared.endpoint)
            .field("generation", &shared.generation)
            .finish()
    }
}

async fn dispatch_loop(
    inner: Weak<Inner>,
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        match inner.upgrade() {
            Some(inner) if inner.accepts(&envelope) => {}
            Some(_) => {
                trace!(
                    "Dropping stale dispatch (generation {}, session {})",
                    envelope.generation, envelope.session
                );
                continue;
            }
            None => break,
        }

        match envelope.dispatch {
            Dispatch::Event(event) => sink.on_event(event),
            Dispatch::Status(status) => sink.on_status(status),
            Dispatch::Disconnected => sink.on_disconnected(),
        }
    }
    debug!("Dispatcher stopped");
}

async fn keep_alive(inner: Weak<Inner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        if !inner.is_current(generation) {
            break;
        }
        if let Err(e) = inner.send(Command::get(KEEP_ALIVE_PATH)) {
            debug!("Keep-alive not sent: {}", e);
        }
    }
}

async fn run_connection(
    inner: Weak<Inner>,
    generation: u64,
    endpoint: Endpoint,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
) {
    let connect = TcpStream::connect((endpoint.address.as_str(), endpoint.port));
    let stream = match tokio::time::timeout(connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!("Connect to {} failed: {}", endpoint, e);
            report_failure(&inner, generation, connect_failure_message(&endpoint, &e));
            return;
        }
        Err(_) => {
            debug!("Connect to {} timed out", endpoint);
            report_failure(&inner, generation, unreachable_message(&endpoint));
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }

    match inner.upgrade() {
        Some(i) if i.mark_ready(generation) => {}
        _ => return,
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut chunk = BytesMut::with_capacity(READ_CHUNK);
    loop {
        tokio::select! {
            read = reader.read_buf(&mut chunk) => match read {
                Ok(0) => {
                    report_failure(&inner, generation, "Connection lost, reconnecting…".to_string());
                    return;
                }
                Ok(_) => {
                    let current = inner.upgrade().is_some_and(|i| i.ingest(generation, &chunk));
                    if !current {
                        return;
                    }
                    chunk.clear();
                }
                Err(e) => {
                    debug!("Read from {} failed: {}", endpoint, e);
                    report_failure(&inner, generation, "Connection lost, reconnecting…".to_string());
                    return;
                }
            },
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        debug!("Write to {} failed: {}", endpoint, e);
                        report_failure(&inner, generation, "Send failed, reconnecting…".to_string());
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

fn report_failure(inner: &Weak<Inner>, generation: u64, message: String) {
    if let Some(inner) = inner.upgrade() {
        inner.handle_failure(generation, message);
    }
}

fn connect_failure_message(endpoint: &Endpoint, error: &std::io::Error) -> String {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => "Connection failed: is UA Console running?".to_string(),
        _ => unreachable_message(endpoint),
    }
}

fn unreachable_message(endpoint: &Endpoint) -> String {
    format!("UA Console not reachable on {}", endpoint)
}

fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 && delay.as_secs() > 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::sink::{ChannelSink, SinkMessage};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn fast_config() -> ClientConfig {
        ClientConfig::default()
            .with_reconnect(Duration::from_millis(50), Duration::from_millis(200))
            .with_connect_timeout(Duration::from_secs(2))
    }

    async fn next_status(rx: &mut mpsc::UnboundedReceiver<SinkMessage>) -> ConnectionStatus {
        loop {
            let msg = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for status")
                .expect("sink closed");
            if let SinkMessage::Status(status) = msg {
                return status;
            }
        }
    }

    async fn refused_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Endpoint::new("127.0.0.1", port)
    }

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(Duration::from_secs(4)), "4s");
        assert_eq!(format_delay(Duration::from_millis(250)), "250ms");
    }

    #[tokio::test]
    async fn test_send_without_socket_fails() {
        let (sink, _rx) = ChannelSink::new();
        let manager = ConnectionManager::new(ClientConfig::default(), Arc::new(sink));
        assert!(matches!(manager.get("/devices"), Err(MonitorError::NotConnected)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_without_endpoint_fails() {
        let (sink, _rx) = ChannelSink::new();
        let manager = ConnectionManager::new(ClientConfig::default(), Arc::new(sink));
        assert!(manager.reconnect().is_err());
    }

    #[tokio::test]
    async fn test_refused_connect_schedules_retry() {
        let (sink, mut rx) = ChannelSink::new();
        let manager = ConnectionManager::new(fast_config(), Arc::new(sink));
        manager.connect(refused_endpoint().await);

        assert_eq!(next_status(&mut rx).await.state, ConnectionState::Connecting);
        let failed = next_status(&mut rx).await;
        assert_eq!(failed.state, ConnectionState::Disconnected);
        assert_eq!(failed.message, "Connection failed: is UA Console running?");
        assert_eq!(
            next_status(&mut rx).await.state,
            ConnectionState::Retrying { attempt: 1 }
        );

        // The timer fires and tries again with a longer delay
        assert_eq!(next_status(&mut rx).await.state, ConnectionState::Connecting);
        assert_eq!(next_status(&mut rx).await.state, ConnectionState::Disconnected);
        assert_eq!(
            next_status(&mut rx).await.state,
            ConnectionState::Retrying { attempt: 2 }
        );
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_disconnect_suppresses_retry() {
        let (sink, _rx) = ChannelSink::new();
        let manager = ConnectionManager::new(fast_config(), Arc::new(sink));
        manager.connect(refused_endpoint().await);
        manager.disconnect();
        manager.schedule_retry();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.reconnect_attempt(), 0);
        assert!(manager.get("/devices").is_err());
    }

    #[tokio::test]
    async fn test_connect_bumps_generation_and_ignores_stale_ingest() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let (sink, _rx) = ChannelSink::new();
        let manager = ConnectionManager::new(fast_config(), Arc::new(sink));

        manager.connect(endpoint.clone());
        let first = manager.generation();
        manager.connect(endpoint);
        let second = manager.generation();

        assert!(second > first);
        assert!(!manager.inner.ingest(first, b"{\"path\":\"/a/Mute\",\"data\":true}\0"));
        assert!(manager.inner.ingest(second, b"partial"));
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_retry_keeps_session_notifications() {
        let (sink, _rx) = ChannelSink::new();
        let manager = ConnectionManager::new(fast_config(), Arc::new(sink));
        let endpoint = refused_endpoint().await;
        manager.connect(endpoint.clone());
        let (generation, session) = {
            let shared = manager.inner.lock();
            (shared.generation, shared.session)
        };
        let queued = |dispatch: Dispatch| Envelope {
            generation,
            session,
            dispatch,
        };
        let retrying = || {
            Dispatch::Status(ConnectionStatus::new(
                ConnectionState::Retrying { attempt: 1 },
                "Retrying in 0ms… (attempt 1)",
            ))
        };
        let mute = || {
            Dispatch::Event(ProtocolEvent::BoolValue {
                path: "/a/Mute".into(),
                property: "Mute".into(),
                value: true,
            })
        };

        // A retry firing moves to a new generation within the same session
        {
            let mut shared = manager.inner.lock();
            manager.inner.connect_locked(&mut shared, endpoint.clone());
        }
        assert!(manager.inner.accepts(&queued(Dispatch::Disconnected)));
        assert!(manager.inner.accepts(&queued(retrying())));
        assert!(!manager.inner.accepts(&queued(mute())));

        // A caller-driven connect starts a new session
        manager.connect(endpoint);
        assert!(!manager.inner.accepts(&queued(Dispatch::Disconnected)));
        assert!(!manager.inner.accepts(&queued(retrying())));
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_manual_reconnect_resets_counter() {
        let (sink, mut rx) = ChannelSink::new();
        let manager = ConnectionManager::new(
            ClientConfig::default().with_reconnect(Duration::from_secs(30), Duration::from_secs(60)),
            Arc::new(sink),
        );
        manager.connect(refused_endpoint().await);
        while next_status(&mut rx).await.state != (ConnectionState::Retrying { attempt: 1 }) {}
        assert_eq!(manager.reconnect_attempt(), 1);

        manager.reconnect().unwrap();
        assert_eq!(manager.reconnect_attempt(), 0);
        assert_eq!(next_status(&mut rx).await.state, ConnectionState::Connecting);
        manager.disconnect();
    }
}
