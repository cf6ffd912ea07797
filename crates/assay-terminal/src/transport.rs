//! # Hub Transport
//!
//! WebSocket client for the cash-register hub with automatic reconnection.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Hub Connection States                                │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐   Err to caller                   │
//! │        │              │ Connected  │   (never retried)                 │
//! │        │              └─────┬──────┘                                    │
//! │        │                    │ drop                                      │
//! │        │                    ▼                                           │
//! │        │              ┌────────────┐  recovered                        │
//! │        ├───────────── │Reconnecting│ ──────────► Connected             │
//! │        │  retries     └────────────┘             + Reconnected event   │
//! │        │  exhausted                                                     │
//! │        │                                                                │
//! │        └──── stop() from any state                                      │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential with Jitter)                            │
//! │  ───────────────────────────────────────────                           │
//! │  Attempt 1: 500ms, Attempt 2: 1s, Attempt 3: 2s ... Max: 30s           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only drops after a successful start are retried. A failed initial
//! connect is returned to the caller, which waits for the next session
//! transition.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::auth::AccessToken;
use crate::error::{TerminalError, TerminalResult};
use crate::protocol::{handshake_request, parse_frames, parse_handshake_response, HubMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingInvocations = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Option<Value>, String>>>>>;

// =============================================================================
// Transport State
// =============================================================================

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Initial connect in progress.
    Connecting,
    /// Connected and joined.
    Connected,
    /// Dropped after a successful start; retrying with backoff.
    Reconnecting,
}

impl ConnectionState {
    /// True while a connection exists or is being recovered.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// What a live connection reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The hub called a client method.
    Invocation { target: String, arguments: Vec<Value> },
    /// The connection recovered after a drop.
    Reconnected,
}

// =============================================================================
// Connector Seam
// =============================================================================

/// Opens push connections. The channel manager only ever talks to this
/// seam, never to sockets.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Builds, starts and handshakes a connection.
    ///
    /// The receiver yields events until the connection is stopped or gives
    /// up reconnecting.
    async fn connect(
        &self,
        token: &AccessToken,
    ) -> TerminalResult<(Arc<dyn PushLink>, mpsc::Receiver<TransportEvent>)>;
}

/// One started connection.
#[async_trait]
pub trait PushLink: Send + Sync {
    /// Calls a hub method and waits for its completion.
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> TerminalResult<Option<Value>>;

    /// Stops the connection. Calling it again is a no-op.
    async fn stop(&self);

    async fn state(&self) -> ConnectionState;
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the hub transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the hub.
    pub url: String,

    /// Timeout for connect + handshake, and for each invocation.
    pub connect_timeout: Duration,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Maximum reconnection attempts after a drop (0 = infinite).
    pub max_retries: u32,

    /// Keepalive ping interval.
    pub ping_interval: Duration,

    /// Buffer size of the event channel.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: 0, // Infinite
            ping_interval: Duration::from_secs(15),
            event_buffer: 64,
        }
    }
}

impl TransportConfig {
    /// Hub URL with the access token appended as a query parameter.
    fn url_with_token(&self, token: &AccessToken) -> TerminalResult<String> {
        let mut url = url::Url::parse(&self.url)?;
        url.query_pairs_mut()
            .append_pair("access_token", token.as_str());
        Ok(url.into())
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Hub Connector
// =============================================================================

/// [`PushConnector`] over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct HubConnector {
    config: TransportConfig,
}

impl HubConnector {
    pub fn new(config: TransportConfig) -> Self {
        HubConnector { config }
    }
}

#[async_trait]
impl PushConnector for HubConnector {
    async fn connect(
        &self,
        token: &AccessToken,
    ) -> TerminalResult<(Arc<dyn PushLink>, mpsc::Receiver<TransportEvent>)> {
        let url = self.config.url_with_token(token)?;
        let ws = open_socket(&url, self.config.connect_timeout).await?;
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        info!(url = %self.config.url, "Hub connected");

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(32);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(self.config.event_buffer);
        let (stop_tx, stop_rx) = watch::channel(false);
        let pending: PendingInvocations = Arc::new(Mutex::new(HashMap::new()));

        let transport = Transport {
            config: self.config.clone(),
            url,
            state: state.clone(),
            outgoing_rx,
            events_tx,
            stop_rx,
            pending: pending.clone(),
        };
        let task = tokio::spawn(transport.run(ws));

        let link = HubLink {
            outgoing_tx,
            state,
            stop_tx,
            pending,
            next_id: AtomicU64::new(1),
            invoke_timeout: self.config.connect_timeout,
            task: Mutex::new(Some(task)),
        };

        let link: Arc<dyn PushLink> = Arc::new(link);
        Ok((link, events_rx))
    }
}

/// Connects and completes the protocol handshake within `limit`.
async fn open_socket(url: &str, limit: Duration) -> TerminalResult<WsStream> {
    match timeout(limit, handshake(url)).await {
        Ok(result) => result,
        Err(_) => Err(TerminalError::Timeout(limit.as_secs())),
    }
}

async fn handshake(url: &str) -> TerminalResult<WsStream> {
    let (mut ws, response) = connect_async(url).await?;
    debug!(status = ?response.status(), "WebSocket handshake complete");

    ws.send(WsMessage::Text(handshake_request()?.into())).await?;

    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let rest = parse_handshake_response(text.as_str())?;
                if !rest.is_empty() {
                    debug!("Discarding messages batched with the handshake response");
                }
                return Ok(ws);
            }
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(TerminalError::ConnectionFailed(format!(
                    "hub closed during handshake: {:?}",
                    frame
                )))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TerminalError::from(e)),
            None => return Err(TerminalError::Disconnected),
        }
    }
}

// =============================================================================
// Hub Link
// =============================================================================

/// Handle to a started hub connection.
pub struct HubLink {
    outgoing_tx: mpsc::Sender<String>,
    state: Arc<RwLock<ConnectionState>>,
    stop_tx: watch::Sender<bool>,
    pending: PendingInvocations,
    next_id: AtomicU64,
    invoke_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PushLink for HubLink {
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> TerminalResult<Option<Value>> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(TerminalError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = HubMessage::invoke(id.clone(), method, arguments).to_frame()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.outgoing_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TerminalError::Disconnected);
        }
        debug!(method, invocation_id = %id, "Invocation sent");

        match timeout(self.invoke_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(TerminalError::HubInvocation {
                method: method.to_string(),
                message,
            }),
            // Sender dropped: the connection went away.
            Ok(Err(_)) => Err(TerminalError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TerminalError::Timeout(self.invoke_timeout.as_secs()))
            }
        }
    }

    async fn stop(&self) {
        let task = self.task.lock().await.take();
        let Some(task) = task else {
            debug!("Hub link already stopped");
            return;
        };

        let _ = self.stop_tx.send(true);
        if let Err(e) = task.await {
            warn!(?e, "Hub transport task ended abnormally");
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

// =============================================================================
// Transport Task
// =============================================================================

/// How one connection ended.
#[derive(Debug)]
enum LoopExit {
    Stopped,
    Dropped(TerminalError),
    ClosedByHub {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

struct Transport {
    config: TransportConfig,
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_rx: mpsc::Receiver<String>,
    events_tx: mpsc::Sender<TransportEvent>,
    stop_rx: watch::Receiver<bool>,
    pending: PendingInvocations,
}

impl Transport {
    /// Runs connections until stopped or until reconnection gives up.
    async fn run(mut self, first: WsStream) {
        let mut ws = first;

        loop {
            let exit = self.connection_loop(ws).await;
            self.fail_pending().await;

            match exit {
                LoopExit::Stopped => break,
                LoopExit::ClosedByHub {
                    error,
                    allow_reconnect: false,
                } => {
                    warn!(?error, "Hub closed the connection");
                    break;
                }
                LoopExit::ClosedByHub { error, .. } => {
                    info!(?error, "Hub closed the connection, reconnecting");
                }
                LoopExit::Dropped(e) => {
                    warn!(error = %e, "Hub connection dropped, reconnecting");
                }
            }

            *self.state.write().await = ConnectionState::Reconnecting;
            match self.reconnect().await {
                Some(next) => {
                    ws = next;
                    *self.state.write().await = ConnectionState::Connected;
                    info!("Hub reconnected");
                    if self.events_tx.send(TransportEvent::Reconnected).await.is_err() {
                        debug!("Event receiver dropped");
                    }
                }
                None => break,
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!("Hub transport stopped");
    }

    /// Retries with backoff. `None` means stopped or retries exhausted.
    async fn reconnect(&mut self) -> Option<WsStream> {
        let mut backoff = self.config.create_backoff();
        let mut attempts = 0u32;

        loop {
            if self.config.max_retries > 0 && attempts >= self.config.max_retries {
                error!(
                    max_retries = self.config.max_retries,
                    "Max reconnection attempts reached"
                );
                return None;
            }

            let Some(delay) = backoff.next_backoff() else {
                error!("Backoff exhausted");
                return None;
            };
            debug!(?delay, attempt = attempts + 1, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop_rx.changed() => {
                    info!("Stopped during backoff");
                    return None;
                }
            }
            if *self.stop_rx.borrow() {
                return None;
            }

            attempts += 1;
            match open_socket(&self.url, self.config.connect_timeout).await {
                Ok(ws) => return Some(ws),
                Err(e) => warn!(error = %e, attempt = attempts, "Reconnect attempt failed"),
            }
        }
    }

    /// Pumps one connection.
    async fn connection_loop(&mut self, ws: WsStream) -> LoopExit {
        let (mut write, mut read) = ws.split();

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                Some(frame) = self.outgoing_rx.recv() => {
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        return LoopExit::Dropped(e.into());
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(exit) = self.dispatch(text.as_str()).await {
                                return exit;
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = write.send(WsMessage::Pong(data)).await {
                                return LoopExit::Dropped(e.into());
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            debug!(?frame, "Received close frame");
                            return LoopExit::Dropped(TerminalError::Disconnected);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return LoopExit::Dropped(e.into()),
                        None => return LoopExit::Dropped(TerminalError::Disconnected),
                    }
                }

                _ = ping.tick() => {
                    let frame = match HubMessage::Ping.to_frame() {
                        Ok(frame) => frame,
                        Err(e) => return LoopExit::Dropped(e),
                    };
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        return LoopExit::Dropped(e.into());
                    }
                }

                _ = self.stop_rx.changed() => {
                    info!("Stop requested, closing hub connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return LoopExit::Stopped;
                }
            }
        }
    }

    /// Routes the messages of one text frame.
    async fn dispatch(&mut self, text: &str) -> Option<LoopExit> {
        for message in parse_frames(text) {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Failed to parse hub message");
                    continue;
                }
            };

            match message {
                HubMessage::Invocation {
                    target, arguments, ..
                } => {
                    debug!(target = %target, "Hub event");
                    let event = TransportEvent::Invocation { target, arguments };
                    if self.events_tx.send(event).await.is_err() {
                        debug!("Event receiver dropped");
                    }
                }
                HubMessage::Completion {
                    invocation_id,
                    result,
                    error,
                } => {
                    let waiter = self.pending.lock().await.remove(&invocation_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(match error {
                                Some(message) => Err(message),
                                None => Ok(result),
                            });
                        }
                        None => debug!(%invocation_id, "Completion for unknown invocation"),
                    }
                }
                HubMessage::Ping => debug!("Received ping"),
                HubMessage::Close {
                    error,
                    allow_reconnect,
                } => {
                    return Some(LoopExit::ClosedByHub {
                        error,
                        allow_reconnect,
                    })
                }
                HubMessage::Unsupported(kind) => debug!(kind, "Ignoring unsupported hub message"),
            }
        }
        None
    }

    /// Drops every waiting invocation; their callers see `Disconnected`.
    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending invocations");
        }
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerWs = WebSocketStream<TcpStream>;

    fn config(addr: std::net::SocketAddr) -> TransportConfig {
        TransportConfig {
            url: format!("ws://{}/hubs/cash-register", addr),
            connect_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Accepts one client and answers its handshake.
    async fn accept_client(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                assert!(text.as_str().contains("\"protocol\":\"json\""));
            }
            other => panic!("expected handshake, got {:?}", other),
        }
        ws.send(WsMessage::Text("{}\u{1e}".into())).await.unwrap();
        ws
    }

    /// Reads frames until an invocation arrives.
    async fn next_invocation(ws: &mut ServerWs) -> (String, String) {
        loop {
            let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
                panic!("connection ended");
            };
            for message in parse_frames(text.as_str()) {
                if let Ok(HubMessage::Invocation {
                    invocation_id: Some(id),
                    target,
                    ..
                }) = message
                {
                    return (id, target);
                }
            }
        }
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert!(ConnectionState::Reconnecting.is_live());
        assert!(!ConnectionState::Connecting.is_live());
    }

    #[test]
    fn test_token_goes_into_query() {
        let config = TransportConfig {
            url: "wss://office.example/hubs/cash-register".into(),
            ..Default::default()
        };
        let url = config.url_with_token(&AccessToken::new("tok en")).unwrap();
        assert_eq!(
            url,
            "wss://office.example/hubs/cash-register?access_token=tok+en"
        );
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = HubConnector::new(config(addr));
        let result = connector.connect(&AccessToken::new("tok")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invoke_push_and_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_client(&listener).await;
            let (id, target) = next_invocation(&mut ws).await;
            assert_eq!(target, "JoinCashRegisterGroup");
            let completion = format!("{{\"type\":3,\"invocationId\":\"{}\"}}\u{1e}", id);
            ws.send(WsMessage::Text(completion.into())).await.unwrap();
            ws.send(WsMessage::Text(
                "{\"type\":1,\"target\":\"ReceivePendingCashIn\",\"arguments\":[]}\u{1e}".into(),
            ))
            .await
            .unwrap();
            // Drain until the client closes.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let connector = HubConnector::new(config(addr));
        let (link, mut events) = connector.connect(&AccessToken::new("tok")).await.unwrap();
        assert_eq!(link.state().await, ConnectionState::Connected);

        let result = link
            .invoke("JoinCashRegisterGroup", vec![json!("reg-1")])
            .await
            .unwrap();
        assert_eq!(result, None);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::Invocation {
                target: "ReceivePendingCashIn".into(),
                arguments: vec![]
            }
        );

        link.stop().await;
        assert_eq!(link.state().await, ConnectionState::Disconnected);
        link.stop().await;
        assert!(events.recv().await.is_none());
        assert!(matches!(
            link.invoke("JoinCashRegisterGroup", vec![]).await,
            Err(TerminalError::Disconnected)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invocation_error_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut ws = accept_client(&listener).await;
            let (id, _) = next_invocation(&mut ws).await;
            let completion = format!(
                "{{\"type\":3,\"invocationId\":\"{}\",\"error\":\"unknown register\"}}\u{1e}",
                id
            );
            ws.send(WsMessage::Text(completion.into())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let connector = HubConnector::new(config(addr));
        let (link, _events) = connector.connect(&AccessToken::new("tok")).await.unwrap();
        let err = link.invoke("JoinCashRegisterGroup", vec![]).await.unwrap_err();
        assert!(matches!(err, TerminalError::HubInvocation { .. }));
        link.stop().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let first = accept_client(&listener).await;
            drop(first);
            let mut second = accept_client(&listener).await;
            while let Some(Ok(_)) = second.next().await {}
        });

        let connector = HubConnector::new(config(addr));
        let (link, mut events) = connector.connect(&AccessToken::new("tok")).await.unwrap();

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TransportEvent::Reconnected);
        assert_eq!(link.state().await, ConnectionState::Connected);

        link.stop().await;
        server.await.unwrap();
    }
}
