//! # Intake Workflow Engine
//!
//! Runs the pure [`IntakeWorkflow`] against the back office. Each command
//! is `begin_*` under the lock, the REST call without it, then
//! `complete_*` under the lock again. A reset in between bumps the
//! workflow epoch and the late answer is dropped as stale.
//!
//! ## Consistency Errors
//! ```text
//! complete_*(ticket, record)
//!     │
//!     ├── record.id == ticket id ──► applied
//!     │
//!     └── record.id != ticket id ──► IdentityMismatch
//!                                       │
//!                                       ├── fetch_intake(ticket id)
//!                                       ├── apply_refetched(epoch, record)
//!                                       └── error returned to the caller
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use assay_core::form::OperatorFormState;
use assay_core::workflow::{Applied, IntakeWorkflow, Ticket, WorkflowView};
use assay_core::{
    CoreError, CoreResult, CreateIntakeRequest, CustomerTier, IntakeRecord, IronPurchaseReceipt,
    IronPurchaseRequest, Tab,
};

use crate::error::{TerminalError, TerminalResult};
use crate::ledger::BalanceLedger;
use crate::store::DomainStore;

pub struct IntakeEngine {
    cash_register_id: String,
    store: Arc<dyn DomainStore>,
    ledger: Arc<BalanceLedger>,
    workflow: Mutex<IntakeWorkflow>,
}

impl IntakeEngine {
    pub fn new(
        cash_register_id: impl Into<String>,
        workflow: IntakeWorkflow,
        store: Arc<dyn DomainStore>,
        ledger: Arc<BalanceLedger>,
    ) -> Self {
        IntakeEngine {
            cash_register_id: cash_register_id.into(),
            store,
            ledger,
            workflow: Mutex::new(workflow),
        }
    }

    pub async fn view(&self) -> WorkflowView {
        self.workflow.lock().await.view()
    }

    pub async fn tab(&self) -> Tab {
        self.workflow.lock().await.tab()
    }

    pub async fn has_progress(&self) -> bool {
        self.workflow.lock().await.has_progress()
    }

    /// Tier of the customer attached to the current intake.
    pub async fn attached_tier(&self) -> Option<CustomerTier> {
        self.workflow
            .lock()
            .await
            .intake()
            .customer
            .as_ref()
            .map(|c| c.tier)
    }

    pub async fn edit_form<F>(&self, edit: F) -> WorkflowView
    where
        F: FnOnce(&mut OperatorFormState) + Send,
    {
        let mut workflow = self.workflow.lock().await;
        workflow.edit_form(edit);
        workflow.view()
    }

    pub async fn reset(&self) -> WorkflowView {
        let mut workflow = self.workflow.lock().await;
        workflow.reset();
        debug!(epoch = workflow.epoch(), "Workflow reset");
        workflow.view()
    }

    pub async fn switch_tab(&self, tab: Tab) -> WorkflowView {
        let mut workflow = self.workflow.lock().await;
        workflow.switch_tab(tab);
        info!(%tab, "Tab switched");
        workflow.view()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Creates the intake and loads its offer options.
    pub async fn submit(&self, session_open: bool) -> TerminalResult<WorkflowView> {
        let (ticket, submission, shop_id) = {
            let mut workflow = self.workflow.lock().await;
            let (ticket, submission) = workflow.begin_submit(session_open)?;
            (ticket, submission, workflow.intake().shop_id.clone())
        };

        let request = CreateIntakeRequest {
            shop_id,
            cash_register_id: self.cash_register_id.clone(),
            weights: submission.weights,
            currency_code: submission.currency_code.clone(),
            customer: submission.customer.clone(),
        };
        let record = match self.store.create_intake(&request).await {
            Ok(record) => record,
            Err(e) => return Err(self.failed(&ticket, e).await),
        };

        let intake_id = record.id.clone();
        let applied = self
            .workflow
            .lock()
            .await
            .complete_submit(&ticket, submission, record)?;
        if applied == Applied::Stale {
            debug!(%intake_id, "Created intake arrived after a reset");
            return Ok(self.view().await);
        }
        info!(%intake_id, "Intake created");

        match self.store.fetch_offer_options(&intake_id).await {
            Ok(options) => {
                self.workflow
                    .lock()
                    .await
                    .apply_offer_options(&ticket, options);
            }
            Err(e) => warn!(%intake_id, error = %e, "Offer options unavailable"),
        }
        Ok(self.view().await)
    }

    pub async fn recalculate(&self) -> TerminalResult<WorkflowView> {
        let ticket = self.workflow.lock().await.begin_recalculate()?;
        let result = self.store.recalculate_intake(ticket.intake_id()?).await;
        self.finish(&ticket, result, IntakeWorkflow::complete_recalculate)
            .await?;
        Ok(self.view().await)
    }

    pub async fn attach_customer(&self, phone: &str) -> TerminalResult<WorkflowView> {
        let (ticket, phone) = self.workflow.lock().await.begin_attach_customer(phone)?;
        let result = self
            .store
            .attach_customer(ticket.intake_id()?, &phone)
            .await;
        self.finish(&ticket, result, IntakeWorkflow::complete_attach_customer)
            .await?;
        Ok(self.view().await)
    }

    pub async fn offer(&self) -> TerminalResult<WorkflowView> {
        let ticket = self.workflow.lock().await.begin_offer()?;
        let result = self.store.offer_intake(ticket.intake_id()?).await;
        self.finish(&ticket, result, IntakeWorkflow::complete_offer)
            .await?;
        Ok(self.view().await)
    }

    /// Accepts the intake and refreshes the drawer balance.
    pub async fn accept(&self) -> TerminalResult<WorkflowView> {
        let (ticket, phone) = self.workflow.lock().await.begin_accept()?;
        let intake_id = ticket.intake_id()?.to_string();
        let result = self.store.accept_intake(&intake_id, &phone).await;
        let applied = self
            .finish(&ticket, result, IntakeWorkflow::complete_accept)
            .await?;
        if applied == Applied::Updated {
            info!(%intake_id, "Intake accepted");
            self.refresh_balance().await;
        }
        Ok(self.view().await)
    }

    /// Rejects the intake. The workflow is back at `None` afterwards.
    pub async fn reject(&self) -> TerminalResult<WorkflowView> {
        let ticket = self.workflow.lock().await.begin_reject()?;
        let intake_id = ticket.intake_id()?.to_string();
        if let Err(e) = self.store.reject_intake(&intake_id).await {
            return Err(self.failed(&ticket, e).await);
        }
        let mut workflow = self.workflow.lock().await;
        if workflow.complete_reject(&ticket) == Applied::Updated {
            info!(%intake_id, "Intake rejected");
        }
        Ok(workflow.view())
    }

    /// Submits the iron form as one bulk purchase.
    pub async fn submit_iron_purchase(
        &self,
        session_open: bool,
    ) -> TerminalResult<IronPurchaseReceipt> {
        let (ticket, request) = {
            let mut workflow = self.workflow.lock().await;
            let (ticket, lines, customer_phone) = workflow.begin_iron_purchase(session_open)?;
            let request = IronPurchaseRequest {
                shop_id: workflow.intake().shop_id.clone(),
                cash_register_id: self.cash_register_id.clone(),
                customer_phone,
                lines,
            };
            (ticket, request)
        };

        let receipt = match self.store.submit_iron_purchase(&request).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.failed(&ticket, e).await),
        };
        info!(receipt_id = %receipt.id, total = %receipt.total, "Iron purchase submitted");

        self.workflow.lock().await.complete_iron_purchase(&ticket);
        self.refresh_balance().await;
        Ok(receipt)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn refresh_balance(&self) {
        if let Err(e) = self.ledger.refresh().await {
            warn!(error = %e, "Balance refresh failed");
        }
    }

    /// Releases the ticket after a failed request.
    async fn failed(&self, ticket: &Ticket, err: TerminalError) -> TerminalError {
        warn!(command = %ticket.command, error = %err, "Intake command failed");
        self.workflow.lock().await.fail(ticket);
        err
    }

    /// Applies a record answer, repairing local state on identity mismatch.
    async fn finish<F>(
        &self,
        ticket: &Ticket,
        result: TerminalResult<IntakeRecord>,
        complete: F,
    ) -> TerminalResult<Applied>
    where
        F: FnOnce(&mut IntakeWorkflow, &Ticket, IntakeRecord) -> CoreResult<Applied> + Send,
    {
        let record = match result {
            Ok(record) => record,
            Err(e) => return Err(self.failed(ticket, e).await),
        };

        let outcome = {
            let mut workflow = self.workflow.lock().await;
            complete(&mut *workflow, ticket, record)
        };
        match outcome {
            Ok(Applied::Stale) => {
                debug!(command = %ticket.command, "Answer arrived after a reset");
                Ok(Applied::Stale)
            }
            Ok(Applied::Updated) => Ok(Applied::Updated),
            Err(CoreError::IdentityMismatch { expected, actual }) => {
                warn!(%expected, %actual, command = %ticket.command, "Server answered for another intake");
                self.refetch(ticket.epoch, &expected).await;
                Err(CoreError::IdentityMismatch { expected, actual }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refetch(&self, epoch: u64, intake_id: &str) {
        match self.store.fetch_intake(intake_id).await {
            Ok(record) => {
                let applied = self.workflow.lock().await.apply_refetched(epoch, record);
                debug!(%intake_id, ?applied, "Intake refetched");
            }
            Err(e) => warn!(%intake_id, error = %e, "Refetch after mismatch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{customer, intake_record, RecordingEmitter, ScriptedStore};
    use assay_core::form::{IronForm, IronLineInput};
    use assay_core::workflow::{IntakeCommand, WorkflowRules};
    use assay_core::{IntakeStatus, Money};
    use std::time::Duration;

    fn engine(store: Arc<ScriptedStore>) -> IntakeEngine {
        let ledger = Arc::new(BalanceLedger::new(
            "reg-1",
            store.clone(),
            Arc::new(RecordingEmitter::default()),
            Duration::from_secs(5),
        ));
        let workflow = IntakeWorkflow::new("shop-7", Tab::Catalyst, WorkflowRules::default());
        IntakeEngine::new("reg-1", workflow, store, ledger)
    }

    async fn fill(engine: &IntakeEngine, phone: &str) {
        engine
            .edit_form(|form| {
                if let OperatorFormState::Catalyst(f) = form {
                    f.powder_weight_total = "12.5".into();
                    f.pt_weight = "1.2".into();
                    f.pd_weight = "0.3".into();
                    f.rh_weight = "0.1".into();
                    f.phone = phone.into();
                }
            })
            .await;
    }

    async fn created(store: &Arc<ScriptedStore>) -> IntakeEngine {
        let engine = engine(store.clone());
        fill(&engine, "+37499123456").await;
        engine.submit(true).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_submit_creates_intake_and_loads_options() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;

        let view = engine.view().await;
        assert_eq!(view.intake.status, IntakeStatus::Created);
        assert_eq!(view.intake.offer_price, Some(Money::from_minor(100_000)));
        assert_eq!(view.offer_options.len(), 1);
        assert!(!view.is_submitting());

        let request = store.last_create().unwrap();
        assert_eq!(request.cash_register_id, "reg-1");
        assert_eq!(request.customer.phone, "+37499123456");
    }

    #[tokio::test]
    async fn test_empty_phone_never_reaches_store() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine(store.clone());
        fill(&engine, "").await;

        let err = engine.submit(true).await.unwrap_err();
        assert!(matches!(err, TerminalError::Core(CoreError::Validation(_))));
        assert_eq!(store.calls("create_intake"), 0);

        let view = engine.view().await;
        assert!(view.form.has_tried_submit());
        assert_eq!(view.intake.status, IntakeStatus::None);
    }

    #[tokio::test]
    async fn test_rejected_submit_keeps_status() {
        let store = Arc::new(ScriptedStore::default());
        store.fail("create_intake");
        let engine = engine(store.clone());
        fill(&engine, "+37499123456").await;

        assert!(matches!(
            engine.submit(true).await,
            Err(TerminalError::Rejected { .. })
        ));
        let view = engine.view().await;
        assert_eq!(view.intake.status, IntakeStatus::None);
        assert_eq!(view.running, None);

        store.recover("create_intake");
        engine.submit(true).await.unwrap();
        assert_eq!(engine.view().await.intake.status, IntakeStatus::Created);
    }

    #[tokio::test]
    async fn test_recalculate_counts() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;

        store.queue_intake(intake_record("41", 120_000));
        engine.recalculate().await.unwrap();
        engine.recalculate().await.unwrap();

        let view = engine.view().await;
        assert_eq!(view.recalculations_amount, 2);
        assert_eq!(view.intake.status, IntakeStatus::Created);
    }

    #[tokio::test]
    async fn test_identity_mismatch_refetches() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;

        store.queue_intake(intake_record("42", 999));
        store.queue_intake(intake_record("41", 130_000));
        let err = engine.recalculate().await.unwrap_err();
        assert!(matches!(
            err,
            TerminalError::Core(CoreError::IdentityMismatch { .. })
        ));
        assert!(err.is_retryable());
        assert_eq!(store.calls("fetch_intake"), 1);

        let view = engine.view().await;
        assert_eq!(view.intake.id.as_deref(), Some("41"));
        assert_eq!(view.intake.offer_price, Some(Money::from_minor(130_000)));
        assert_eq!(view.recalculations_amount, 0);
        assert_eq!(view.running, None);
    }

    #[tokio::test]
    async fn test_offer_then_accept_refreshes_balance() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;

        engine.offer().await.unwrap();
        assert_eq!(engine.view().await.intake.status, IntakeStatus::Offered);

        engine.accept().await.unwrap();
        assert_eq!(engine.view().await.intake.status, IntakeStatus::Accepted);
        assert_eq!(store.calls("accept_intake"), 1);
        assert_eq!(store.calls("fetch_balance"), 1);
    }

    #[tokio::test]
    async fn test_reject_returns_to_none() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;
        engine.recalculate().await.unwrap();
        engine.offer().await.unwrap();

        let view = engine.reject().await.unwrap();
        assert_eq!(view.intake.status, IntakeStatus::None);
        assert_eq!(view.recalculations_amount, 0);
        assert!(!view.form.is_dirty());
    }

    #[tokio::test]
    async fn test_attach_customer_sets_tier() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;
        store.set_customer(Some(customer("+37499000111", CustomerTier::Dealer)));

        engine.attach_customer("099 000111").await.unwrap();
        assert_eq!(engine.attached_tier().await, Some(CustomerTier::Dealer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_after_reset_is_dropped() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;
        store.delay_intakes(Duration::from_millis(100));
        store.queue_intake(intake_record("41", 777));

        let (recalculated, _) = tokio::join!(engine.recalculate(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            engine.reset().await
        });

        recalculated.unwrap();
        let view = engine.view().await;
        assert_eq!(view.intake.status, IntakeStatus::None);
        assert_eq!(view.intake.offer_price, None);
        assert_eq!(view.recalculations_amount, 0);
    }

    #[tokio::test]
    async fn test_second_command_while_running_is_busy() {
        let store = Arc::new(ScriptedStore::default());
        let engine = created(&store).await;
        store.delay_intakes(Duration::from_millis(50));

        let (first, second) = tokio::join!(engine.recalculate(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            engine.offer().await
        });
        first.unwrap();
        assert!(matches!(
            second,
            Err(TerminalError::Core(CoreError::Busy {
                running: IntakeCommand::Recalculate,
                requested: IntakeCommand::Offer,
            }))
        ));
    }

    #[tokio::test]
    async fn test_iron_purchase_resets_form() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine(store.clone());
        engine.switch_tab(Tab::Iron).await;
        engine
            .edit_form(|form| {
                if let OperatorFormState::Iron(IronForm { lines, .. }) = form {
                    lines.push(IronLineInput {
                        catalog_item_id: Some("heavy".into()),
                        weight: "120".into(),
                        price: "14400".into(),
                    });
                }
            })
            .await;

        let receipt = engine.submit_iron_purchase(true).await.unwrap();
        assert_eq!(receipt.id, "iron-1");
        assert_eq!(store.last_iron().unwrap().lines.len(), 1);
        assert_eq!(store.calls("fetch_balance"), 1);

        let view = engine.view().await;
        assert_eq!(view.form.tab(), Tab::Iron);
        assert!(!view.form.is_dirty());
    }
}
