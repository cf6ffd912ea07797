//! # Balance Ledger
//!
//! Holds the drawer balance of the register and the reveal timer that
//! hides it again after a few seconds.
//!
//! Refreshes carry a ticket from a monotonic counter. A response is
//! applied only if no newer ticket was applied before it, so a slow
//! refresh can never overwrite a faster, later one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use assay_core::Money;

use crate::error::TerminalResult;
use crate::events::{BalanceView, TerminalEventEmitter};
use crate::store::DomainStore;

#[derive(Debug, Default)]
struct BalanceState {
    balance: Money,
    visible: bool,
    applied: u64,
}

impl BalanceState {
    fn view(&self) -> BalanceView {
        BalanceView {
            balance: self.balance,
            visible: self.visible,
        }
    }
}

/// Balance of one cash register.
pub struct BalanceLedger {
    cash_register_id: String,
    store: Arc<dyn DomainStore>,
    emitter: Arc<dyn TerminalEventEmitter>,
    display: Duration,
    next_ticket: AtomicU64,
    state: Arc<RwLock<BalanceState>>,
    hide_task: Mutex<Option<JoinHandle<()>>>,
}

impl BalanceLedger {
    pub fn new(
        cash_register_id: impl Into<String>,
        store: Arc<dyn DomainStore>,
        emitter: Arc<dyn TerminalEventEmitter>,
        display: Duration,
    ) -> Self {
        BalanceLedger {
            cash_register_id: cash_register_id.into(),
            store,
            emitter,
            display,
            next_ticket: AtomicU64::new(0),
            state: Arc::new(RwLock::new(BalanceState::default())),
            hide_task: Mutex::new(None),
        }
    }

    pub async fn view(&self) -> BalanceView {
        self.state.read().await.view()
    }

    pub async fn balance(&self) -> Money {
        self.state.read().await.balance
    }

    fn issue(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fetches the balance and applies it unless a newer refresh already landed.
    pub async fn refresh(&self) -> TerminalResult<Money> {
        let ticket = self.issue();
        let balance = self.store.fetch_balance(&self.cash_register_id).await?;

        let mut state = self.state.write().await;
        if ticket <= state.applied {
            debug!(ticket, applied = state.applied, "Discarding stale balance");
            return Ok(state.balance);
        }
        state.applied = ticket;
        state.balance = balance;
        debug!(cash_register_id = %self.cash_register_id, %balance, "Balance refreshed");
        self.emitter.emit_balance(&state.view());
        Ok(balance)
    }

    /// Shows the balance and schedules it to hide again.
    ///
    /// Revealing while already visible restarts the timer.
    pub async fn reveal(&self) -> BalanceView {
        let view = {
            let mut state = self.state.write().await;
            state.visible = true;
            state.view()
        };
        self.emitter.emit_balance(&view);

        let state = self.state.clone();
        let emitter = self.emitter.clone();
        let display = self.display;
        let task = tokio::spawn(async move {
            tokio::time::sleep(display).await;
            let mut state = state.write().await;
            state.visible = false;
            emitter.emit_balance(&state.view());
        });

        if let Some(previous) = self.hide_task.lock().await.replace(task) {
            previous.abort();
        }
        view
    }

    /// Hides and zeroes the balance, cancels the timer and invalidates
    /// refreshes still in flight.
    pub async fn clear(&self) {
        if let Some(task) = self.hide_task.lock().await.take() {
            task.abort();
        }
        let barrier = self.issue();
        let mut state = self.state.write().await;
        *state = BalanceState {
            applied: barrier,
            ..Default::default()
        };
    }
}
