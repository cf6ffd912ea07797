//! # Pending Transaction Reconciler
//!
//! Tracks the one cash-in another actor started on this register and that
//! the operator still has to confirm.
//!
//! ## Slot Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   None ──invalidate (server has one)──► Pending ──confirm ok──► None   │
//! │     ▲                                      │                            │
//! │     └──────invalidate (server has none)────┘                            │
//! │                                                                         │
//! │   Push events never carry the data. They only invalidate, and the      │
//! │   slot is refetched from the back office.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stale Responses
//! A push-triggered refetch and a resync can be in flight at the same
//! time. Each refetch takes a ticket from a monotonic counter; a response
//! whose ticket is not newer than the last applied one is dropped.
//! Confirmation and `clear` raise the barrier too, so nothing requested
//! before them can resurrect the slot.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use assay_core::{PendingCashIn, PendingStatus, PendingTransaction};

use crate::channel::ChannelListener;
use crate::error::{TerminalError, TerminalResult};
use crate::events::{ErrorNotice, TerminalEventEmitter};
use crate::ledger::BalanceLedger;
use crate::store::DomainStore;

#[derive(Debug, Default)]
struct Slot {
    transaction: Option<PendingTransaction>,
    applied: u64,
}

/// Single-slot pending cash-in state of one register.
pub struct PendingReconciler {
    cash_register_id: String,
    store: Arc<dyn DomainStore>,
    ledger: Arc<BalanceLedger>,
    emitter: Arc<dyn TerminalEventEmitter>,
    next_ticket: AtomicU64,
    slot: RwLock<Slot>,
}

impl PendingReconciler {
    pub fn new(
        cash_register_id: impl Into<String>,
        store: Arc<dyn DomainStore>,
        ledger: Arc<BalanceLedger>,
        emitter: Arc<dyn TerminalEventEmitter>,
    ) -> Self {
        PendingReconciler {
            cash_register_id: cash_register_id.into(),
            store,
            ledger,
            emitter,
            next_ticket: AtomicU64::new(0),
            slot: RwLock::new(Slot::default()),
        }
    }

    pub async fn current(&self) -> Option<PendingTransaction> {
        self.slot.read().await.transaction.clone()
    }

    pub async fn status(&self) -> PendingStatus {
        self.slot
            .read()
            .await
            .transaction
            .as_ref()
            .map_or(PendingStatus::None, |t| t.status)
    }

    fn issue(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Refetches the authoritative snapshot and replaces the slot with it.
    pub async fn on_invalidate(&self) -> TerminalResult<PendingStatus> {
        let ticket = self.issue();
        let snapshot = self
            .store
            .fetch_pending_cash_in(&self.cash_register_id)
            .await?;

        let mut slot = self.slot.write().await;
        if ticket <= slot.applied {
            debug!(ticket, applied = slot.applied, "Discarding stale pending snapshot");
            return Ok(slot
                .transaction
                .as_ref()
                .map_or(PendingStatus::None, |t| t.status));
        }
        slot.applied = ticket;
        slot.transaction = snapshot.map(pending);

        match &slot.transaction {
            Some(t) => info!(pending_id = %t.id, amount = %t.amount, "Pending cash-in"),
            None => debug!(cash_register_id = %self.cash_register_id, "No pending cash-in"),
        }
        self.emitter.emit_pending(slot.transaction.as_ref());
        Ok(slot
            .transaction
            .as_ref()
            .map_or(PendingStatus::None, |t| t.status))
    }

    /// Confirms the pending cash-in.
    ///
    /// On success the slot goes back to `None` and the balance is
    /// refreshed; the returned transaction carries `Confirmed`. On failure
    /// the slot stays `Pending`.
    pub async fn confirm(&self) -> TerminalResult<PendingTransaction> {
        let target = self
            .slot
            .read()
            .await
            .transaction
            .clone()
            .ok_or(TerminalError::NothingPending)?;

        self.store
            .confirm_pending_cash_in(&self.cash_register_id, &target.id)
            .await?;

        {
            let barrier = self.issue();
            let mut slot = self.slot.write().await;
            slot.applied = barrier;
            if slot.transaction.as_ref().map(|t| t.id.as_str()) == Some(target.id.as_str()) {
                slot.transaction = None;
            }
            self.emitter.emit_pending(slot.transaction.as_ref());
        }
        info!(pending_id = %target.id, "Pending cash-in confirmed");

        if let Err(e) = self.ledger.refresh().await {
            warn!(error = %e, "Balance refresh after confirmation failed");
        }

        Ok(PendingTransaction {
            status: PendingStatus::Confirmed,
            ..target
        })
    }

    /// Empties the slot and drops every refetch still in flight.
    pub async fn clear(&self) {
        let barrier = self.issue();
        let mut slot = self.slot.write().await;
        slot.applied = barrier;
        if slot.transaction.take().is_some() {
            self.emitter.emit_pending(None);
        }
    }
}

/// The resync routine: balance and pending snapshot, refetched together.
///
/// The channel runs it after the initial connect and after every
/// reconnect; both paths go through here.
pub struct Resync {
    ledger: Arc<BalanceLedger>,
    reconciler: Arc<PendingReconciler>,
}

impl Resync {
    pub fn new(ledger: Arc<BalanceLedger>, reconciler: Arc<PendingReconciler>) -> Self {
        Resync { ledger, reconciler }
    }
}

#[async_trait]
impl ChannelListener for Resync {
    async fn resync(&self) {
        debug!("Resyncing balance and pending cash-in");
        if let Err(e) = self.ledger.refresh().await {
            warn!(error = %e, "Balance resync failed");
        }
        if let Err(e) = self.reconciler.on_invalidate().await {
            warn!(error = %e, "Pending cash-in resync failed");
        }
    }

    /// A failed refetch reaches the operator; the slot keeps its last state.
    async fn pending_invalidated(&self) {
        if let Err(e) = self.reconciler.on_invalidate().await {
            warn!(error = %e, "Pending cash-in refetch failed");
            self.reconciler.emitter.emit_error(&ErrorNotice::from(&e));
        }
    }
}

fn pending(snapshot: PendingCashIn) -> PendingTransaction {
    PendingTransaction {
        id: snapshot.id,
        cash_register_id: snapshot.cash_register_id,
        amount: snapshot.amount,
        status: PendingStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{cash_in, RecordingEmitter, ScriptedStore};
    use assay_core::Money;
    use std::time::Duration;

    fn reconciler(store: Arc<ScriptedStore>) -> PendingReconciler {
        let emitter = Arc::new(RecordingEmitter::default());
        let ledger = Arc::new(BalanceLedger::new(
            "reg-1",
            store.clone(),
            emitter.clone(),
            Duration::from_secs(5),
        ));
        PendingReconciler::new("reg-1", store, ledger, emitter)
    }

    #[tokio::test]
    async fn test_invalidate_sets_pending() {
        let store = Arc::new(ScriptedStore::default());
        store.set_pending(Some(cash_in("p-1", 5_000)));
        let reconciler = reconciler(store.clone());

        assert_eq!(reconciler.on_invalidate().await.unwrap(), PendingStatus::Pending);
        assert_eq!(store.calls("fetch_pending_cash_in"), 1);
        assert_eq!(reconciler.current().await.unwrap().amount, Money::from_minor(5_000));
    }

    #[tokio::test]
    async fn test_second_push_replaces_slot() {
        let store = Arc::new(ScriptedStore::default());
        let reconciler = reconciler(store.clone());

        store.set_pending(Some(cash_in("p-1", 5_000)));
        reconciler.on_invalidate().await.unwrap();
        store.set_pending(Some(cash_in("p-2", 7_000)));
        reconciler.on_invalidate().await.unwrap();

        let current = reconciler.current().await.unwrap();
        assert_eq!(current.id, "p-2");
    }

    #[tokio::test]
    async fn test_confirmed_elsewhere_clears_slot() {
        let store = Arc::new(ScriptedStore::default());
        let reconciler = reconciler(store.clone());

        store.set_pending(Some(cash_in("p-1", 5_000)));
        reconciler.on_invalidate().await.unwrap();
        store.set_pending(None);
        assert_eq!(reconciler.on_invalidate().await.unwrap(), PendingStatus::None);
        assert_eq!(reconciler.current().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_is_discarded() {
        let store = Arc::new(ScriptedStore::default());
        store.queue_pending(Some(cash_in("p-old", 1_000)), Duration::from_millis(200));
        store.queue_pending(Some(cash_in("p-new", 2_000)), Duration::from_millis(10));
        let reconciler = reconciler(store);

        let (first, second) = tokio::join!(reconciler.on_invalidate(), reconciler.on_invalidate());
        first.unwrap();
        second.unwrap();
        assert_eq!(reconciler.current().await.unwrap().id, "p-new");
    }

    #[tokio::test]
    async fn test_confirm_clears_once_and_refreshes_balance() {
        let store = Arc::new(ScriptedStore::default());
        store.set_pending(Some(cash_in("p-1", 5_000)));
        let reconciler = reconciler(store.clone());
        reconciler.on_invalidate().await.unwrap();

        let confirmed = reconciler.confirm().await.unwrap();
        assert_eq!(confirmed.status, PendingStatus::Confirmed);
        assert_eq!(confirmed.id, "p-1");
        assert_eq!(reconciler.status().await, PendingStatus::None);
        assert_eq!(store.calls("confirm_pending_cash_in"), 1);
        assert_eq!(store.calls("fetch_balance"), 1);

        assert!(matches!(
            reconciler.confirm().await,
            Err(TerminalError::NothingPending)
        ));
        assert_eq!(store.calls("confirm_pending_cash_in"), 1);
    }

    #[tokio::test]
    async fn test_failed_confirm_keeps_pending() {
        let store = Arc::new(ScriptedStore::default());
        store.set_pending(Some(cash_in("p-1", 5_000)));
        let reconciler = reconciler(store.clone());
        reconciler.on_invalidate().await.unwrap();

        store.fail("confirm_pending_cash_in");
        let err = reconciler.confirm().await.unwrap_err();
        assert!(matches!(err, TerminalError::Rejected { .. }));
        assert_eq!(reconciler.status().await, PendingStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_inflight_refetch() {
        let store = Arc::new(ScriptedStore::default());
        store.queue_pending(Some(cash_in("p-1", 1_000)), Duration::from_millis(100));
        let reconciler = reconciler(store);

        let (fetched, ()) = tokio::join!(reconciler.on_invalidate(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reconciler.clear().await;
        });
        assert_eq!(fetched.unwrap(), PendingStatus::None);
        assert_eq!(reconciler.current().await, None);
    }

    #[tokio::test]
    async fn test_failed_push_refetch_is_reported() {
        let store = Arc::new(ScriptedStore::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let ledger = Arc::new(BalanceLedger::new(
            "reg-1",
            store.clone(),
            emitter.clone(),
            Duration::from_secs(5),
        ));
        let reconciler = Arc::new(PendingReconciler::new(
            "reg-1",
            store.clone(),
            ledger.clone(),
            emitter.clone(),
        ));
        let resync = Resync::new(ledger, reconciler.clone());

        store.fail("fetch_pending_cash_in");
        resync.pending_invalidated().await;

        let errors = emitter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Operation);
        assert_eq!(reconciler.current().await, None);
    }
}
