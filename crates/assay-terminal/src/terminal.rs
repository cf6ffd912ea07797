//! # Terminal
//!
//! The command surface the operator UI talks to. One [`Terminal`] drives one
//! cash register; several can live side by side because every identifier
//! and collaborator is passed in through [`TerminalBuilder`].
//!
//! ## Command Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Terminal Command                              │
//! │                                                                         │
//! │  1. Refuse with ShuttingDown after logout                               │
//! │  2. Run it on the owning component                                      │
//! │     session ─► SessionController    intake ─► IntakeEngine              │
//! │     pending ─► PendingReconciler    tabs   ─► ContextResolver gate      │
//! │  3. Emit the changed state to the UI                                    │
//! │  4. Report a failure to emit_error exactly once                         │
//! │  5. Re-resolve reference data for the new tab / customer                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use assay_core::context::TabSwitch;
use assay_core::form::OperatorFormState;
use assay_core::workflow::{IntakeWorkflow, WorkflowView};
use assay_core::{Customer, IronPurchaseReceipt, PendingTransaction, Session, Tab};

use crate::auth::AccessToken;
use crate::channel::ChannelManager;
use crate::config::TerminalConfig;
use crate::context::{ContextResolver, ReferenceData};
use crate::engine::IntakeEngine;
use crate::error::{TerminalError, TerminalResult};
use crate::events::{BalanceView, ErrorNotice, NoOpEmitter, TerminalEventEmitter};
use crate::ledger::BalanceLedger;
use crate::reconciler::{PendingReconciler, Resync};
use crate::session::SessionController;
use crate::snapshot::{AuthSnapshot, SnapshotStore};
use crate::store::{DomainStore, HttpStore};
use crate::transport::{ConnectionState, HubConnector, PushConnector};

/// One operator terminal bound to one cash register.
pub struct Terminal {
    cash_register_id: String,
    session: SessionController,
    channel: Arc<ChannelManager>,
    ledger: Arc<BalanceLedger>,
    reconciler: Arc<PendingReconciler>,
    engine: IntakeEngine,
    context: ContextResolver,
    emitter: Arc<dyn TerminalEventEmitter>,
    shut_down: AtomicBool,
}

impl Terminal {
    pub fn cash_register_id(&self) -> &str {
        &self.cash_register_id
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn session(&self) -> Session {
        self.session.session().await
    }

    pub async fn workflow(&self) -> WorkflowView {
        self.engine.view().await
    }

    pub async fn pending(&self) -> Option<PendingTransaction> {
        self.reconciler.current().await
    }

    pub async fn channel_state(&self) -> ConnectionState {
        self.channel.state().await
    }

    pub async fn reference(&self) -> ReferenceData {
        self.context.data().await
    }

    pub async fn balance(&self) -> BalanceView {
        self.ledger.view().await
    }

    /// Tab waiting for confirmation, if any.
    pub async fn pending_tab(&self) -> Option<Tab> {
        self.context.pending_tab().await
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Startup: resumes a cached open session and loads reference data.
    pub async fn restore(&self) -> TerminalResult<Session> {
        self.ensure_running()?;
        let result = self.session.restore().await;
        if let Ok(session) = &result {
            self.emitter.emit_session(session);
        }
        let result = self.report(result);
        self.refresh_context().await;
        result
    }

    pub async fn open_session(&self) -> TerminalResult<Session> {
        self.ensure_running()?;
        let result = self.session.open().await;
        if let Ok(session) = &result {
            self.emitter.emit_session(session);
        }
        self.report(result)
    }

    pub async fn close_session(&self) -> TerminalResult<Session> {
        self.ensure_running()?;
        let result = self.session.close().await;
        if let Ok(session) = &result {
            self.emitter.emit_session(session);
        }
        self.report(result)
    }

    /// Terminal logout. Later commands fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(cash_register_id = %self.cash_register_id, "Terminal shutting down");
        self.session.shutdown().await;
    }

    // =========================================================================
    // Balance & Pending Cash-In
    // =========================================================================

    pub async fn reveal_balance(&self) -> TerminalResult<BalanceView> {
        self.ensure_running()?;
        Ok(self.ledger.reveal().await)
    }

    pub async fn confirm_pending_transaction(&self) -> TerminalResult<PendingTransaction> {
        self.ensure_running()?;
        let result = self.reconciler.confirm().await;
        self.report(result)
    }

    // =========================================================================
    // Intake Workflow
    // =========================================================================

    pub async fn submit_intake(&self) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let open = self.session.is_open().await;
        let result = self.engine.submit(open).await;
        self.after_workflow(result).await
    }

    pub async fn recalculate_intake(&self) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let result = self.engine.recalculate().await;
        self.after_workflow(result).await
    }

    pub async fn attach_customer(&self, phone: &str) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let result = self.engine.attach_customer(phone).await;
        self.after_workflow(result).await
    }

    pub async fn offer_intake(&self) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let result = self.engine.offer().await;
        self.after_workflow(result).await
    }

    pub async fn accept_intake(&self) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let result = self.engine.accept().await;
        self.after_workflow(result).await
    }

    pub async fn reject_intake(&self) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let result = self.engine.reject().await;
        if result.is_ok() {
            self.context.forget_lookup().await;
        }
        self.after_workflow(result).await
    }

    /// Back to a blank intake from any state.
    pub async fn reset_workflow(&self) -> TerminalResult<WorkflowView> {
        self.ensure_running()?;
        let view = self.engine.reset().await;
        self.context.forget_lookup().await;
        self.emitter.emit_workflow(&view);
        self.refresh_context().await;
        Ok(view)
    }

    pub async fn edit_form<F>(&self, edit: F) -> TerminalResult<WorkflowView>
    where
        F: FnOnce(&mut OperatorFormState) + Send,
    {
        self.ensure_running()?;
        let view = self.engine.edit_form(edit).await;
        self.emitter.emit_workflow(&view);
        Ok(view)
    }

    pub async fn submit_iron_purchase(&self) -> TerminalResult<IronPurchaseReceipt> {
        self.ensure_running()?;
        let open = self.session.is_open().await;
        let result = self.engine.submit_iron_purchase(open).await;
        self.after_workflow(result).await
    }

    // =========================================================================
    // Customer & Tabs
    // =========================================================================

    /// Ad-hoc lookup; a non-default tier pulls in exchange rates.
    pub async fn lookup_customer(&self, phone: &str) -> TerminalResult<Option<Customer>> {
        self.ensure_running()?;
        let result = self.context.lookup_customer(phone).await;
        let result = self.report(result);
        if result.is_ok() {
            self.refresh_context().await;
        }
        result
    }

    /// Switches tabs, or parks the switch when it would discard progress.
    pub async fn switch_tab(&self, tab: Tab) -> TerminalResult<TabSwitch> {
        self.ensure_running()?;
        let has_progress = self.engine.has_progress().await;
        let outcome = self.context.request_tab(tab, has_progress).await;
        match outcome {
            TabSwitch::Committed(tab) => self.commit_tab(tab).await,
            TabSwitch::NeedsConfirmation(tab) => {
                info!(%tab, "Tab switch waits for confirmation");
            }
            TabSwitch::Unchanged => debug!(%tab, "Tab already active"),
        }
        Ok(outcome)
    }

    pub async fn confirm_tab_switch(&self) -> TerminalResult<Option<Tab>> {
        self.ensure_running()?;
        let confirmed = self.context.confirm_tab().await;
        if let Some(tab) = confirmed {
            self.commit_tab(tab).await;
        }
        Ok(confirmed)
    }

    pub async fn cancel_tab_switch(&self) -> TerminalResult<Option<Tab>> {
        self.ensure_running()?;
        let cancelled = self.context.cancel_tab().await;
        if let Some(tab) = cancelled {
            debug!(%tab, "Tab switch cancelled");
        }
        Ok(cancelled)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_running(&self) -> TerminalResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TerminalError::ShuttingDown);
        }
        Ok(())
    }

    /// Forwards a failure to the error sink. Teardown no-ops stay silent.
    fn report<T>(&self, result: TerminalResult<T>) -> TerminalResult<T> {
        if let Err(e) = &result {
            self.notify(e);
        }
        result
    }

    fn notify(&self, err: &TerminalError) {
        if err.is_shutting_down() {
            return;
        }
        warn!(kind = ?err.kind(), error = %err, "Command failed");
        self.emitter.emit_error(&ErrorNotice::from(err));
    }

    async fn after_workflow<T>(&self, result: TerminalResult<T>) -> TerminalResult<T> {
        self.emitter.emit_workflow(&self.engine.view().await);
        let result = self.report(result);
        self.refresh_context().await;
        result
    }

    async fn commit_tab(&self, tab: Tab) {
        let view = self.engine.switch_tab(tab).await;
        self.context.forget_lookup().await;
        self.emitter.emit_workflow(&view);
        self.refresh_context().await;
    }

    /// Loads what the current tab and customer need. Failures are toasted
    /// but never fail the command that triggered the refresh.
    async fn refresh_context(&self) {
        let tab = self.engine.tab().await;
        let tier = self.engine.attached_tier().await;
        if let Err(e) = self.context.resolve(tab, tier).await {
            self.notify(&e);
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for a [`Terminal`]; anything not supplied comes from the config.
pub struct TerminalBuilder {
    config: TerminalConfig,
    auth: AuthSnapshot,
    store: Option<Arc<dyn DomainStore>>,
    connector: Option<Arc<dyn PushConnector>>,
    emitter: Option<Arc<dyn TerminalEventEmitter>>,
    snapshots: Option<SnapshotStore>,
}

impl TerminalBuilder {
    pub fn new(config: TerminalConfig, auth: AuthSnapshot) -> Self {
        TerminalBuilder {
            config,
            auth,
            store: None,
            connector: None,
            emitter: None,
            snapshots: None,
        }
    }

    /// Replaces the REST store.
    pub fn with_store(mut self, store: Arc<dyn DomainStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the hub connector.
    pub fn with_connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn TerminalEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn build(self) -> TerminalResult<Terminal> {
        self.config.validate()?;
        let AuthSnapshot {
            cash_register_id,
            access_token,
            shop_id,
        } = self.auth;
        if cash_register_id.trim().is_empty() {
            return Err(TerminalError::InvalidConfig(
                "Cash register id required".into(),
            ));
        }
        let token = AccessToken::new(access_token);

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let store: Arc<dyn DomainStore> = match self.store {
            Some(store) => store,
            None => Arc::new(HttpStore::new(
                &self.config.api.base_url,
                token.clone(),
                self.config.request_timeout(),
            )?),
        };
        let connector: Arc<dyn PushConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(HubConnector::new(self.config.transport())),
        };
        let snapshots = match self.snapshots {
            Some(snapshots) => snapshots,
            None => SnapshotStore::new(self.config.snapshot_dir()?),
        };

        let ledger = Arc::new(BalanceLedger::new(
            cash_register_id.clone(),
            store.clone(),
            emitter.clone(),
            self.config.balance_display(),
        ));
        let reconciler = Arc::new(PendingReconciler::new(
            cash_register_id.clone(),
            store.clone(),
            ledger.clone(),
            emitter.clone(),
        ));
        let resync = Arc::new(Resync::new(ledger.clone(), reconciler.clone()));
        let channel = Arc::new(ChannelManager::new(connector, resync, emitter.clone()));
        let session = SessionController::new(
            cash_register_id.clone(),
            token,
            store.clone(),
            snapshots,
            channel.clone(),
            ledger.clone(),
            reconciler.clone(),
        );

        let tab = Tab::default();
        let workflow = IntakeWorkflow::new(shop_id.clone(), tab, self.config.workflow_rules());
        let engine = IntakeEngine::new(
            cash_register_id.clone(),
            workflow,
            store.clone(),
            ledger.clone(),
        );
        let context = ContextResolver::new(
            cash_register_id.clone(),
            shop_id,
            self.config.terminal.phone_region,
            tab,
            store,
        );

        info!(%cash_register_id, "Terminal ready");
        Ok(Terminal {
            cash_register_id,
            session,
            channel,
            ledger,
            reconciler,
            engine,
            context,
            emitter,
            shut_down: AtomicBool::new(false),
        })
    }
}
