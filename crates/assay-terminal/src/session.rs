//! # Session Controller
//!
//! Single source of truth for whether this terminal may transact.
//!
//! ```text
//! Closed ──open──► Open ──close──► Closed
//! ```
//!
//! Every transition drives the channel: `open` and `restore` connect it,
//! `close` and `shutdown` tear it down together with the pending slot and
//! the balance timer. Open while open and close while closed are no-ops.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use assay_core::{Session, SessionStatus};

use crate::auth::AccessToken;
use crate::channel::{ChannelManager, ChannelTarget};
use crate::error::{TerminalError, TerminalResult};
use crate::ledger::BalanceLedger;
use crate::reconciler::PendingReconciler;
use crate::snapshot::{SessionSnapshot, SnapshotStore};
use crate::store::DomainStore;

pub struct SessionController {
    token: AccessToken,
    store: Arc<dyn DomainStore>,
    snapshots: SnapshotStore,
    channel: Arc<ChannelManager>,
    ledger: Arc<BalanceLedger>,
    reconciler: Arc<PendingReconciler>,
    session: RwLock<Session>,
}

impl SessionController {
    pub fn new(
        cash_register_id: impl Into<String>,
        token: AccessToken,
        store: Arc<dyn DomainStore>,
        snapshots: SnapshotStore,
        channel: Arc<ChannelManager>,
        ledger: Arc<BalanceLedger>,
        reconciler: Arc<PendingReconciler>,
    ) -> Self {
        SessionController {
            token,
            store,
            snapshots,
            channel,
            ledger,
            reconciler,
            session: RwLock::new(Session::closed(cash_register_id)),
        }
    }

    /// The session with the ledger's current balance.
    pub async fn session(&self) -> Session {
        let mut session = self.session.read().await.clone();
        session.balance = self.ledger.balance().await;
        session
    }

    pub async fn is_open(&self) -> bool {
        self.session.read().await.is_open()
    }

    fn target(&self, session: &Session) -> Option<ChannelTarget> {
        session.is_open().then(|| ChannelTarget {
            cash_register_id: session.cash_register_id.clone(),
            token: self.token.clone(),
        })
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.snapshots.save_session(&SessionSnapshot::of(session)) {
            warn!(error = %e, "Failed to save session snapshot");
        }
    }

    async fn refresh_balance(&self) {
        if let Err(e) = self.ledger.refresh().await {
            warn!(error = %e, "Balance refresh failed");
        }
    }

    /// Opens the register.
    ///
    /// A register already open on another terminal fails with
    /// `RegisterBusy` and is not retried.
    pub async fn open(&self) -> TerminalResult<Session> {
        let cash_register_id = {
            let session = self.session.read().await;
            if session.is_open() {
                debug!(cash_register_id = %session.cash_register_id, "Session already open");
                drop(session);
                return Ok(self.session().await);
            }
            session.cash_register_id.clone()
        };

        let opened = self.store.open_session(&cash_register_id).await?;
        info!(%cash_register_id, session_id = %opened.session_id, "Session opened");

        let session = {
            let mut session = self.session.write().await;
            session.status = SessionStatus::Open;
            session.open_session_id = Some(opened.session_id);
            session.clone()
        };
        self.persist(&session);

        self.refresh_balance().await;
        self.channel.ensure(self.target(&session)).await;
        Ok(self.session().await)
    }

    /// Closes the register and tears down everything bound to the session.
    pub async fn close(&self) -> TerminalResult<Session> {
        let (cash_register_id, session_id) = {
            let session = self.session.read().await;
            if session.status == SessionStatus::Closed {
                debug!(cash_register_id = %session.cash_register_id, "Session already closed");
                return Ok(session.clone());
            }
            let session_id = session
                .open_session_id
                .clone()
                .ok_or_else(|| TerminalError::NoActiveSession(session.cash_register_id.clone()))?;
            (session.cash_register_id.clone(), session_id)
        };

        self.store.close_session(&cash_register_id, &session_id).await?;
        info!(%cash_register_id, %session_id, "Session closed");

        let session = {
            let mut session = self.session.write().await;
            *session = Session::closed(cash_register_id);
            session.clone()
        };
        self.persist(&session);
        self.release().await;
        Ok(session)
    }

    /// Applies the cached session snapshot of this register.
    ///
    /// A snapshot of another register, or none at all, leaves the session
    /// closed.
    pub async fn restore(&self) -> TerminalResult<Session> {
        let snapshot = self.snapshots.load_session()?;
        let restored = {
            let mut session = self.session.write().await;
            match snapshot {
                Some(snapshot) if snapshot.cash_register_id == session.cash_register_id => {
                    info!(status = %snapshot.status, "Restoring session snapshot");
                    *session = snapshot.into_session();
                }
                Some(snapshot) => {
                    warn!(
                        cached = %snapshot.cash_register_id,
                        "Ignoring session snapshot of another register"
                    );
                }
                None => {}
            }
            session.clone()
        };

        if restored.is_open() {
            self.refresh_balance().await;
            self.channel.ensure(self.target(&restored)).await;
        }
        Ok(self.session().await)
    }

    /// Terminal logout. Stops the channel and clears timers without
    /// touching the session on the server.
    pub async fn shutdown(&self) {
        self.release().await;
    }

    async fn release(&self) {
        self.channel.teardown().await;
        self.reconciler.clear().await;
        self.ledger.clear().await;
    }
}
