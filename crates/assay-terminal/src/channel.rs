//! # Real-Time Channel Manager
//!
//! Owns the one push connection of an open session. Nothing else in the
//! terminal touches the transport.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Channel Lifecycle                                 │
//! │                                                                         │
//! │  ensure(Some(target))                                                  │
//! │     │                                                                   │
//! │     ├── same target, link alive ──► nothing to do                      │
//! │     ├── link gave up ─────────────► teardown, connect again            │
//! │     ├── other target / none ──────► teardown old link                  │
//! │     ▼                                                                   │
//! │  connect ──fail──► log, stay Disconnected (no retry until next ensure) │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  spawn event pump ─► join register group ─► listener.resync()          │
//! │                                                                         │
//! │  pump:  PendingCashInCreated / ReceivePendingCashIn                    │
//! │           └─► listener.pending_invalidated()                           │
//! │         Reconnected                                                    │
//! │           └─► re-join group ─► listener.resync()                       │
//! │                                                                         │
//! │  ensure(None) / teardown ──► stop link once, abort pump                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pump checks a generation counter before every event, so an event
//! that was already buffered when the channel was torn down is dropped.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AccessToken;
use crate::events::TerminalEventEmitter;
use crate::protocol::{HubEvent, JOIN_GROUP_METHOD};
use crate::transport::{ConnectionState, PushConnector, PushLink, TransportEvent};

/// Receives what the channel learns from the hub.
#[async_trait]
pub trait ChannelListener: Send + Sync {
    /// Refresh balance and pending snapshot. Runs after the initial
    /// connect and after every reconnect.
    async fn resync(&self);

    /// The pending cash-in of the register may have changed.
    async fn pending_invalidated(&self);
}

/// What a connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub cash_register_id: String,
    pub token: AccessToken,
}

#[derive(Default)]
struct Live {
    target: Option<ChannelTarget>,
    link: Option<Arc<dyn PushLink>>,
    pump: Option<JoinHandle<()>>,
}

/// Keeps zero or one push connection in line with the session.
pub struct ChannelManager {
    connector: Arc<dyn PushConnector>,
    listener: Arc<dyn ChannelListener>,
    emitter: Arc<dyn TerminalEventEmitter>,
    generation: Arc<AtomicU64>,
    live: Mutex<Live>,
}

impl ChannelManager {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        listener: Arc<dyn ChannelListener>,
        emitter: Arc<dyn TerminalEventEmitter>,
    ) -> Self {
        ChannelManager {
            connector,
            listener,
            emitter,
            generation: Arc::new(AtomicU64::new(0)),
            live: Mutex::new(Live::default()),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        let link = self.live.lock().await.link.clone();
        match link {
            Some(link) => link.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    /// Brings the connection in line with `target`.
    ///
    /// `None` means no connection may exist. Connect failures are logged
    /// and leave the channel `Disconnected`; they are never retried here.
    pub async fn ensure(&self, target: Option<ChannelTarget>) -> ConnectionState {
        let mut live = self.live.lock().await;

        if let Some(link) = live.link.as_ref().filter(|_| live.target == target) {
            let state = link.state().await;
            if state != ConnectionState::Disconnected {
                return state;
            }
            warn!("Push channel gave up, connecting again");
        }

        self.stop_live(&mut live).await;

        let Some(target) = target else {
            return ConnectionState::Disconnected;
        };

        if let Err(e) = target.token.validate() {
            warn!(error = %e, "Not connecting the push channel");
            return ConnectionState::Disconnected;
        }

        self.emitter.emit_channel(ConnectionState::Connecting);
        let (link, events) = match self.connector.connect(&target.token).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(
                    cash_register_id = %target.cash_register_id,
                    error = %e,
                    "Push channel failed to start"
                );
                self.emitter.emit_channel(ConnectionState::Disconnected);
                return ConnectionState::Disconnected;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pump = EventPump {
            generation: self.generation.clone(),
            mine: generation,
            cash_register_id: target.cash_register_id.clone(),
            link: link.clone(),
            listener: self.listener.clone(),
            emitter: self.emitter.clone(),
        };
        live.pump = Some(tokio::spawn(pump.run(events)));
        live.link = Some(link.clone());
        live.target = Some(target.clone());

        join_group(link.as_ref(), &target.cash_register_id).await;
        info!(cash_register_id = %target.cash_register_id, "Push channel connected");
        self.emitter.emit_channel(ConnectionState::Connected);

        self.listener.resync().await;
        link.state().await
    }

    /// Stops the connection if there is one. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let mut live = self.live.lock().await;
        self.stop_live(&mut live).await;
    }

    async fn stop_live(&self, live: &mut Live) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        live.target = None;
        if let Some(pump) = live.pump.take() {
            pump.abort();
        }
        if let Some(link) = live.link.take() {
            link.stop().await;
            info!("Push channel stopped");
            self.emitter.emit_channel(ConnectionState::Disconnected);
        }
    }
}

async fn join_group(link: &dyn PushLink, cash_register_id: &str) {
    let arguments = vec![Value::String(cash_register_id.to_string())];
    match link.invoke(JOIN_GROUP_METHOD, arguments).await {
        Ok(_) => debug!(cash_register_id, "Joined register group"),
        Err(e) => warn!(cash_register_id, error = %e, "Joining register group failed"),
    }
}

/// Forwards transport events of one connection to the listener.
struct EventPump {
    generation: Arc<AtomicU64>,
    mine: u64,
    cash_register_id: String,
    link: Arc<dyn PushLink>,
    listener: Arc<dyn ChannelListener>,
    emitter: Arc<dyn TerminalEventEmitter>,
}

impl EventPump {
    fn current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.mine
    }

    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if !self.current() {
                debug!("Dropping event of a torn down channel");
                break;
            }
            match event {
                TransportEvent::Invocation { target, .. } => match HubEvent::from_target(&target) {
                    Some(hub_event) => {
                        debug!(event = hub_event.name(), "Pending cash-in invalidated");
                        self.listener.pending_invalidated().await;
                    }
                    None => debug!(%target, "Ignoring unknown hub event"),
                },
                TransportEvent::Reconnected => {
                    info!(cash_register_id = %self.cash_register_id, "Push channel reconnected");
                    self.emitter.emit_channel(ConnectionState::Connected);
                    join_group(self.link.as_ref(), &self.cash_register_id).await;
                    if self.current() {
                        self.listener.resync().await;
                    }
                }
            }
        }
        if self.current() {
            warn!(cash_register_id = %self.cash_register_id, "Push channel lost");
            self.emitter.emit_channel(ConnectionState::Disconnected);
        }
        debug!(cash_register_id = %self.cash_register_id, "Event pump finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, RecordingEmitter, ScriptedConnector};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingListener {
        resyncs: AtomicUsize,
        invalidations: AtomicUsize,
    }

    #[async_trait]
    impl ChannelListener for CountingListener {
        async fn resync(&self) {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
        }

        async fn pending_invalidated(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn target(register: &str) -> ChannelTarget {
        ChannelTarget {
            cash_register_id: register.into(),
            token: AccessToken::new("tok"),
        }
    }

    fn manager(connector: Arc<ScriptedConnector>, listener: Arc<CountingListener>) -> ChannelManager {
        ChannelManager::new(connector, listener, Arc::new(RecordingEmitter::default()))
    }

    #[tokio::test]
    async fn test_connect_joins_and_resyncs() {
        let connector = Arc::new(ScriptedConnector::default());
        let listener = Arc::new(CountingListener::default());
        let channel = manager(connector.clone(), listener.clone());

        assert_eq!(channel.ensure(Some(target("reg-1"))).await, ConnectionState::Connected);

        let link = connector.link(0);
        assert_eq!(link.invocations(), vec![(JOIN_GROUP_METHOD.to_string(), vec![Value::from("reg-1")])]);
        assert_eq!(listener.resyncs.load(Ordering::SeqCst), 1);

        // Same target again is a no-op.
        channel.ensure(Some(target("reg-1"))).await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_initial_failure_is_not_retried() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.fail_next_connect();
        let listener = Arc::new(CountingListener::default());
        let channel = manager(connector.clone(), listener.clone());

        assert_eq!(
            channel.ensure(Some(target("reg-1"))).await,
            ConnectionState::Disconnected
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(connector.connects(), 1);
        assert_eq!(listener.resyncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_never_connects() {
        let connector = Arc::new(ScriptedConnector::default());
        let channel = manager(connector.clone(), Arc::new(CountingListener::default()));

        let expired = ChannelTarget {
            cash_register_id: "reg-1".into(),
            token: AccessToken::new(""),
        };
        assert_eq!(channel.ensure(Some(expired)).await, ConnectionState::Disconnected);
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_push_events_invalidate() {
        let connector = Arc::new(ScriptedConnector::default());
        let listener = Arc::new(CountingListener::default());
        let channel = manager(connector.clone(), listener.clone());
        channel.ensure(Some(target("reg-1"))).await;

        let link = connector.link(0);
        link.push_invocation("ReceivePendingCashIn").await;
        link.push_invocation("PendingCashInCreated").await;
        link.push_invocation("SomethingElse").await;

        wait_until(|| listener.invalidations.load(Ordering::SeqCst) == 2).await;
        assert_eq!(listener.resyncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_then_resyncs() {
        let connector = Arc::new(ScriptedConnector::default());
        let listener = Arc::new(CountingListener::default());
        let channel = manager(connector.clone(), listener.clone());
        channel.ensure(Some(target("reg-1"))).await;

        let link = connector.link(0);
        link.push(TransportEvent::Reconnected).await;

        wait_until(|| listener.resyncs.load(Ordering::SeqCst) == 2).await;
        assert_eq!(link.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_stops_once_and_ignores_later_events() {
        let connector = Arc::new(ScriptedConnector::default());
        let listener = Arc::new(CountingListener::default());
        let channel = manager(connector.clone(), listener.clone());
        channel.ensure(Some(target("reg-1"))).await;
        let link = connector.link(0);

        channel.ensure(None).await;
        channel.teardown().await;
        assert_eq!(link.stops(), 1);
        assert_eq!(channel.state().await, ConnectionState::Disconnected);

        link.push_invocation("ReceivePendingCashIn").await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(listener.invalidations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_link_is_replaced_on_next_ensure() {
        let connector = Arc::new(ScriptedConnector::default());
        let listener = Arc::new(CountingListener::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let channel = ChannelManager::new(connector.clone(), listener.clone(), emitter.clone());
        channel.ensure(Some(target("reg-1"))).await;

        connector.link(0).die();
        wait_until(|| emitter.channels().last() == Some(&ConnectionState::Disconnected)).await;
        assert_eq!(channel.state().await, ConnectionState::Disconnected);

        assert_eq!(channel.ensure(Some(target("reg-1"))).await, ConnectionState::Connected);
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.link(0).stops(), 1);
        assert_eq!(listener.resyncs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_new_target_replaces_connection() {
        let connector = Arc::new(ScriptedConnector::default());
        let channel = manager(connector.clone(), Arc::new(CountingListener::default()));

        channel.ensure(Some(target("reg-1"))).await;
        channel.ensure(Some(target("reg-2"))).await;

        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.link(0).stops(), 1);
        assert_eq!(connector.link(1).stops(), 0);
    }
}
