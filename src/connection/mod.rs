//! Connection management: registration, WebSocket lifecycle, heartbeat,
//! and reconnection.
//!
//! Two cooperating state machines drive the channel. The registration
//! machine posts the agent descriptor to the directory with exponential
//! backoff and treats HTTP 409 as already-registered. The connection
//! machine dials the directory WebSocket, flushes the outbox, then runs a
//! single-reader message loop plus a heartbeat task. An unclean close
//! starts exactly one reconnection machine — a latch and a connection
//! generation counter guarantee no duplicate sockets — while a clean close
//! or an explicit [`ConnectionManager::disconnect`] stays down. A 401/403
//! handshake is fatal and is never retried.

pub mod backoff;
pub mod outbox;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::RuntimeConfig;
use crate::connection::backoff::BackoffPolicy;
use crate::connection::outbox::OutboundQueue;
use crate::directory::{DirectoryClient, RegistrationPayload};
use crate::errors::AgentError;
use crate::protocol::Frame;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Base delay for the initial dial loop, in seconds.
const DIAL_BACKOFF_SECS: f64 = 1.5;
/// Bound on the closing handshake when tearing a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// States of the connection machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: authentication was rejected or every retry was exhausted.
    Failed,
}

/// States of the registration machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    /// The directory answered 409; equivalent to registered.
    ConflictAlreadyRegistered,
}

/// Write access to the channel, as seen by the dispatcher and application
/// code. Implemented by [`ConnectionManager`]; narrow on purpose so the
/// dispatcher never depends on connection internals.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> Result<(), AgentError>;
}

/// Consumer of inbound `task` and `message` frames.
///
/// Implementations must not block: a `task` frame is expected to be handed
/// off to its own task so the channel reader keeps draining.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_frame(&self, frame: Frame);
}

enum LoopExit {
    Clean,
    Error,
}

/// Registration, WebSocket lifecycle, heartbeat, and reconnection for one
/// agent. One instance per agent process; at most one live socket at a time.
pub struct ConnectionManager {
    agent_id: String,
    config: RuntimeConfig,
    directory: Arc<DirectoryClient>,
    payload: parking_lot::RwLock<RegistrationPayload>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    conn_state: parking_lot::Mutex<ConnectionState>,
    reg_state: parking_lot::Mutex<RegistrationState>,
    outbox: OutboundQueue,
    heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,
    inbound: parking_lot::RwLock<Option<Arc<dyn InboundHandler>>>,
    /// Monotonic connection generation; stale readers and heartbeats from a
    /// replaced connection recognize themselves and stand down.
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    reconnecting: AtomicBool,
    manual_disconnect: AtomicBool,
    shutdown: Notify,
    me: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub fn new(
        config: RuntimeConfig,
        directory: Arc<DirectoryClient>,
        payload: RegistrationPayload,
    ) -> Arc<Self> {
        let max_outbox = config.max_outbox_size;
        Arc::new_cyclic(|me| Self {
            agent_id: payload.agent_id.clone(),
            config,
            directory,
            payload: parking_lot::RwLock::new(payload),
            writer: tokio::sync::Mutex::new(None),
            conn_state: parking_lot::Mutex::new(ConnectionState::Disconnected),
            reg_state: parking_lot::Mutex::new(RegistrationState::Unregistered),
            outbox: OutboundQueue::new(max_outbox),
            heartbeat: parking_lot::Mutex::new(None),
            inbound: parking_lot::RwLock::new(None),
            generation: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            manual_disconnect: AtomicBool::new(false),
            shutdown: Notify::new(),
            me: me.clone(),
        })
    }

    /// Install the consumer for inbound task/message frames.
    pub fn set_inbound_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.inbound.write() = Some(handler);
    }

    /// Replace the skill list advertised in the registration payload.
    pub fn update_skills(&self, skills: Vec<serde_json::Value>) {
        self.payload.write().skills = skills;
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.conn_state.lock()
    }

    pub fn registration_state(&self) -> RegistrationState {
        *self.reg_state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn is_registered(&self) -> bool {
        matches!(
            self.registration_state(),
            RegistrationState::Registered | RegistrationState::ConflictAlreadyRegistered
        )
    }

    /// Frames currently buffered for the next connection.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// The current reconnection attempt, zeroed on every successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Registration machine
    // -----------------------------------------------------------------------

    /// Register with the directory, then connect.
    ///
    /// Transient failures retry with exponential backoff and jitter; HTTP
    /// 409 counts as success. Gives up after the configured attempt count.
    pub async fn register(&self) -> Result<(), AgentError> {
        if self.is_registered() {
            return self.connect_with_retries().await;
        }

        *self.reg_state.lock() = RegistrationState::Registering;
        let policy = BackoffPolicy::registration(self.config.register_backoff_secs);
        let attempts = self.config.max_register_attempts.max(1);
        let mut last_err = AgentError::transport("registration never attempted");

        for attempt in 1..=attempts {
            log::info!(
                "registration attempt {attempt}/{attempts} for agent `{}`",
                self.agent_id
            );
            let payload = self.payload.read().clone();
            match self.directory.register_agent(&payload).await {
                Ok(outcome) => {
                    *self.reg_state.lock() = match outcome {
                        crate::directory::RegisterOutcome::Accepted => {
                            log::info!("agent `{}` registered", self.agent_id);
                            RegistrationState::Registered
                        }
                        crate::directory::RegisterOutcome::AlreadyRegistered => {
                            RegistrationState::ConflictAlreadyRegistered
                        }
                    };
                    return self.connect_with_retries().await;
                }
                Err(err) if err.is_fatal() => {
                    *self.reg_state.lock() = RegistrationState::Unregistered;
                    return Err(err);
                }
                Err(err) => {
                    log::warn!("registration attempt {attempt} failed: {err}");
                    last_err = err;
                }
            }
            if attempt < attempts {
                let delay = policy.delay(attempt);
                log::info!("retrying registration in {:.2}s", delay.as_secs_f64());
                if !self.backoff_sleep(delay).await {
                    *self.reg_state.lock() = RegistrationState::Unregistered;
                    return Err(AgentError::transport("registration cancelled"));
                }
            }
        }

        log::error!(
            "exhausted {attempts} registration attempts for agent `{}`",
            self.agent_id
        );
        *self.reg_state.lock() = RegistrationState::Unregistered;
        Err(last_err)
    }

    // -----------------------------------------------------------------------
    // Connection machine
    // -----------------------------------------------------------------------

    /// Dial the directory WebSocket, retrying transient failures.
    ///
    /// A 401/403 handshake moves the machine to `Failed` and returns
    /// immediately — authentication errors are never retried.
    pub async fn connect(&self) -> Result<(), AgentError> {
        if !self.is_registered() {
            log::warn!(
                "agent `{}` connecting while unregistered; registering first",
                self.agent_id
            );
            return self.register().await;
        }
        self.connect_with_retries().await
    }

    async fn connect_with_retries(&self) -> Result<(), AgentError> {
        if self.is_connected() {
            log::debug!("agent `{}` is already connected", self.agent_id);
            return Ok(());
        }

        let policy = BackoffPolicy::registration(DIAL_BACKOFF_SECS);
        let attempts = self.config.max_connect_attempts.max(1);
        let mut last_err = AgentError::transport("connection never attempted");

        for attempt in 1..=attempts {
            *self.conn_state.lock() = ConnectionState::Connecting;
            log::info!(
                "connection attempt {attempt}/{attempts} for agent `{}`",
                self.agent_id
            );
            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_fatal() => {
                    log::error!("authentication rejected for `{}`: {err}", self.agent_id);
                    *self.conn_state.lock() = ConnectionState::Failed;
                    return Err(err);
                }
                Err(err) => {
                    log::warn!("connection attempt {attempt} failed: {err}");
                    *self.conn_state.lock() = ConnectionState::Disconnected;
                    last_err = err;
                }
            }
            if attempt < attempts {
                let delay = policy.delay(attempt);
                log::info!("retrying connection in {:.2}s", delay.as_secs_f64());
                if !self.backoff_sleep(delay).await {
                    return Err(AgentError::transport("connection cancelled"));
                }
            }
        }

        log::error!(
            "exhausted {attempts} connection attempts for agent `{}`",
            self.agent_id
        );
        Err(last_err)
    }

    async fn connect_once(&self) -> Result<(), AgentError> {
        let url = format!(
            "{}/agents/connect/{}",
            self.config.websocket_url.trim_end_matches('/'),
            self.agent_id
        );
        log::debug!("dialing {url}");

        let (stream, _response) =
            tokio::time::timeout(self.config.http_timeout, connect_async(&url))
                .await
                .map_err(|_| {
                    AgentError::transport(format!(
                        "connect timed out after {:.0}s",
                        self.config.http_timeout.as_secs_f64()
                    ))
                })?
                .map_err(classify_handshake_error)?;

        let (sink, reader) = stream.split();
        {
            let mut writer = self.writer.lock().await;
            *writer = Some(sink);
            *self.conn_state.lock() = ConnectionState::Connected;
            self.manual_disconnect.store(false, Ordering::SeqCst);
            self.reconnect_attempts.store(0, Ordering::SeqCst);

            // Queued frames are the first writes on the new socket, before
            // the reader starts and any inbound frame can be dispatched.
            let queued = self.outbox.drain();
            if !queued.is_empty() {
                log::info!("flushing {} queued frames", queued.len());
            }
            for frame in queued {
                let Some(sink) = writer.as_mut() else { break };
                match frame.encode() {
                    Ok(text) => {
                        if let Err(err) = sink.send(Message::text(text)).await {
                            log::error!("failed to flush queued frame: {err}");
                        }
                    }
                    Err(err) => log::error!("failed to encode queued frame: {err}"),
                }
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(manager) = self.me.upgrade() {
            tokio::spawn(Self::read_loop(Arc::clone(&manager), reader, generation));
            self.spawn_heartbeat(manager, generation);
        }

        log::info!("agent `{}` connected to the directory", self.agent_id);
        Ok(())
    }

    /// Close the channel and stay down. Idempotent; cancels any pending
    /// reconnection backoff.
    pub async fn disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        // Orphan the current reader so its exit does not trigger reconnect.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown().await;
        log::info!("agent `{}` disconnected", self.agent_id);
    }

    async fn teardown(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
        *self.conn_state.lock() = ConnectionState::Disconnected;
    }

    // -----------------------------------------------------------------------
    // Message loop
    // -----------------------------------------------------------------------

    async fn read_loop(manager: Arc<ConnectionManager>, mut reader: WsReader, generation: u64) {
        log::info!("message loop started for agent `{}`", manager.agent_id);
        let exit = loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => manager.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) => break LoopExit::Clean,
                Some(Ok(_)) => log::debug!("ignoring non-text websocket frame"),
                Some(Err(WsError::ConnectionClosed)) => break LoopExit::Clean,
                Some(Err(err)) => {
                    log::warn!(
                        "websocket error for agent `{}`: {err}",
                        manager.agent_id
                    );
                    break LoopExit::Error;
                }
                None => break LoopExit::Clean,
            }
        };
        manager.on_loop_exit(exit, generation).await;
    }

    /// Decode and route one inbound text frame. Decode failures and handler
    /// errors are logged and never kill the loop.
    async fn handle_text(&self, text: &str) {
        match Frame::decode(text) {
            Ok(Some(Frame::Ping)) => {
                log::debug!("ping received; replying with pong");
                if let Err(err) = self.send(Frame::Pong).await {
                    log::warn!("failed to send pong: {err}");
                }
            }
            Ok(Some(Frame::Pong)) => log::debug!("pong received"),
            Ok(Some(frame)) => {
                let handler = self.inbound.read().clone();
                match handler {
                    Some(handler) => handler.handle_frame(frame).await,
                    None => log::warn!(
                        "dropping inbound frame `{}`: no handler registered",
                        frame.correlation_id().unwrap_or("?")
                    ),
                }
            }
            Ok(None) => log::warn!("ignoring inbound frame with unknown type"),
            Err(err) => log::error!("failed to decode inbound frame: {err}"),
        }
    }

    async fn on_loop_exit(&self, exit: LoopExit, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            // A newer connection replaced this one while we were exiting.
            return;
        }
        let manual = self.manual_disconnect.load(Ordering::SeqCst);
        self.teardown().await;
        match exit {
            LoopExit::Clean => {
                log::info!("connection closed cleanly for agent `{}`", self.agent_id);
            }
            LoopExit::Error if manual => {}
            LoopExit::Error => self.spawn_reconnect(),
        }
    }

    // -----------------------------------------------------------------------
    // Reconnection machine
    // -----------------------------------------------------------------------

    fn spawn_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(manager) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            manager.run_reconnect().await;
            manager.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn run_reconnect(&self) {
        let policy = BackoffPolicy::reconnection(
            self.config.reconnect_backoff_secs,
            self.config.max_backoff_secs,
        );
        let attempts = self.config.max_reconnect_attempts.max(1);

        for attempt in 1..=attempts {
            *self.conn_state.lock() = ConnectionState::Reconnecting;
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);
            let delay = policy.delay(attempt);
            log::info!(
                "reconnecting agent `{}` in {:.2}s (attempt {attempt}/{attempts})",
                self.agent_id,
                delay.as_secs_f64()
            );
            if !self.backoff_sleep(delay).await || self.manual_disconnect.load(Ordering::SeqCst) {
                log::info!("reconnection cancelled for agent `{}`", self.agent_id);
                *self.conn_state.lock() = ConnectionState::Disconnected;
                return;
            }

            // Re-verify registration first; the directory may have dropped us.
            let result = if self.is_registered() {
                self.connect_once().await
            } else {
                log::info!("re-registering agent `{}` before reconnecting", self.agent_id);
                let payload = self.payload.read().clone();
                match self.directory.register_agent(&payload).await {
                    Ok(_) => {
                        *self.reg_state.lock() = RegistrationState::Registered;
                        self.connect_once().await
                    }
                    Err(err) => Err(err),
                }
            };

            match result {
                Ok(()) => {
                    log::info!(
                        "agent `{}` reconnected after {attempt} attempts",
                        self.agent_id
                    );
                    return;
                }
                Err(err) if err.is_fatal() => {
                    log::error!("reconnection fatally rejected: {err}");
                    *self.conn_state.lock() = ConnectionState::Failed;
                    return;
                }
                Err(err) => log::warn!("reconnect attempt {attempt} failed: {err}"),
            }
        }

        log::error!(
            "exhausted {attempts} reconnection attempts for agent `{}`",
            self.agent_id
        );
        *self.conn_state.lock() = ConnectionState::Failed;
    }

    /// Sleep for a backoff delay unless `disconnect()` cancels it.
    /// Returns whether the sleep ran to completion.
    async fn backoff_sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.notified() => false,
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    fn spawn_heartbeat(&self, manager: Arc<ConnectionManager>, generation: u64) {
        let handle = tokio::spawn(async move {
            let interval = manager.config.ping_interval;
            loop {
                tokio::time::sleep(interval).await;
                if manager.generation.load(Ordering::SeqCst) != generation
                    || !manager.is_connected()
                {
                    break;
                }
                log::debug!("sending heartbeat ping for agent `{}`", manager.agent_id);
                if manager.write_direct(Frame::Ping).await.is_err() {
                    log::warn!(
                        "heartbeat send failed for agent `{}`; stopping",
                        manager.agent_id
                    );
                    break;
                }
            }
            log::debug!("heartbeat task finished for agent `{}`", manager.agent_id);
        });
        let mut slot = self.heartbeat.lock();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Outbound path
    // -----------------------------------------------------------------------

    /// Send a frame, or queue it while disconnected.
    ///
    /// A write error tears the connection down, queues the frame, and starts
    /// the reconnection machine; the caller sees success because the frame
    /// is preserved for the next connection.
    pub async fn send(&self, frame: Frame) -> Result<(), AgentError> {
        let text = frame.encode()?;
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => match sink.send(Message::text(text)).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    log::error!("write failed: {err}; queueing frame and reconnecting");
                    *writer = None;
                    drop(writer);
                    *self.conn_state.lock() = ConnectionState::Disconnected;
                    self.outbox.push(frame);
                    self.spawn_reconnect();
                    Ok(())
                }
            },
            None => {
                drop(writer);
                self.outbox.push(frame);
                log::debug!(
                    "queued frame while disconnected ({} pending)",
                    self.outbox.len()
                );
                Ok(())
            }
        }
    }

    /// Write without the queue-on-failure path; used by the heartbeat so a
    /// dead socket surfaces as an error instead of silently queueing pings.
    async fn write_direct(&self, frame: Frame) -> Result<(), AgentError> {
        let text = frame.encode()?;
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(Message::text(text))
                .await
                .map_err(|err| AgentError::transport(err.to_string())),
            None => Err(AgentError::transport("not connected")),
        }
    }
}

#[async_trait]
impl FrameSink for ConnectionManager {
    async fn send_frame(&self, frame: Frame) -> Result<(), AgentError> {
        self.send(frame).await
    }
}

fn classify_handshake_error(err: WsError) -> AgentError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                AgentError::auth(format!("handshake rejected with HTTP {status}"))
            } else {
                AgentError::transport(format!("handshake failed with HTTP {status}"))
            }
        }
        other => AgentError::transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::AgentIdentity;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(ws_url: String) -> RuntimeConfig {
        RuntimeConfig {
            websocket_url: ws_url,
            max_connect_attempts: 1,
            max_reconnect_attempts: 1,
            http_timeout: Duration::from_secs(2),
            ..RuntimeConfig::default()
        }
    }

    /// Route the machines' logging through the test harness; `RUST_LOG`
    /// surfaces it when a test needs diagnosing.
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn manager_for(ws_url: String) -> Arc<ConnectionManager> {
        init_logging();
        let identity = AgentIdentity::new("a1", "Test Agent", "Test");
        let directory = Arc::new(DirectoryClient::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let payload = RegistrationPayload::new(&identity, &[]);
        let manager = ConnectionManager::new(test_config(ws_url), directory, payload);
        // The directory in these tests only speaks WebSocket.
        *manager.reg_state.lock() = RegistrationState::Registered;
        manager
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::text(r#"{"type":"ping"}"#.to_string()))
                .await
                .unwrap();
            // The pong must arrive promptly.
            let reply = tokio::time::timeout(Duration::from_secs(1), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            reply.into_text().unwrap().as_str().to_string()
        });

        let manager = manager_for(format!("ws://{addr}"));
        manager.connect().await.unwrap();
        assert!(manager.is_connected());

        let reply: serde_json::Value =
            serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(reply["type"], "pong");
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_queued_frame_is_first_write_after_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let first = tokio::time::timeout(Duration::from_secs(1), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            first.into_text().unwrap().as_str().to_string()
        });

        let manager = manager_for(format!("ws://{addr}"));

        // Disconnected: the application message is queued, not written.
        manager
            .send(Frame::Message {
                id: "m1".to_string(),
                from: "a1".to_string(),
                to: "a2".to_string(),
                content: json!({"x": 1}),
            })
            .await
            .unwrap();
        assert_eq!(manager.outbox_len(), 1);

        manager.connect().await.unwrap();

        let first: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(first["type"], "message");
        assert_eq!(first["id"], "m1");
        assert_eq!(manager.outbox_len(), 0);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_auth_rejection_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            loop {
                let n = stream.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
                if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            stream
                .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let manager = manager_for(format!("ws://{addr}"));
        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.kind(), "auth");
        assert_eq!(manager.connection_state(), ConnectionState::Failed);
        // No reconnection machine was started for a fatal rejection.
        assert!(!manager.reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_clean_close_does_not_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let manager = manager_for(format!("ws://{addr}"));
        manager.connect().await.unwrap();

        // Give the reader time to observe the close.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert!(!manager.reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_writes_after_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Hold the connection open; drain whatever arrives.
            while ws.next().await.is_some() {}
        });

        let manager = manager_for(format!("ws://{addr}"));
        manager.connect().await.unwrap();
        manager.disconnect().await;
        assert!(!manager.is_connected());

        // Frames after disconnect are queued, never written.
        manager.send(Frame::Pong).await.unwrap();
        assert_eq!(manager.outbox_len(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_when_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while ws.next().await.is_some() {}
                });
            }
        });

        let manager = manager_for(format!("ws://{addr}"));
        manager.connect().await.unwrap();
        let generation = manager.generation.load(Ordering::SeqCst);
        manager.connect().await.unwrap();
        // No second socket was dialed.
        assert_eq!(manager.generation.load(Ordering::SeqCst), generation);
        manager.disconnect().await;
    }
}
