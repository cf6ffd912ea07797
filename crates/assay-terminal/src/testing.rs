//! Scripted collaborators for the orchestration tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use assay_core::workflow::WorkflowView;
use assay_core::{
    CreateIntakeRequest, Customer, CustomerTier, ExchangeRate, Gender, IntakeRecord,
    IronCatalogItem, IronPurchaseReceipt, IronPurchaseRequest, Language, MetalRate, Money,
    OfferOption, OpenedSession, PendingCashIn, PendingTransaction, Session,
};

use crate::auth::AccessToken;
use crate::error::{TerminalError, TerminalResult};
use crate::events::{BalanceView, ErrorNotice, TerminalEventEmitter};
use crate::store::DomainStore;
use crate::transport::{ConnectionState, PushConnector, PushLink, TransportEvent};

pub fn cash_in(id: &str, amount: i64) -> PendingCashIn {
    PendingCashIn {
        id: id.into(),
        cash_register_id: "reg-1".into(),
        amount: Money::from_minor(amount),
    }
}

pub fn intake_record(id: &str, price: i64) -> IntakeRecord {
    IntakeRecord {
        id: id.into(),
        shop_id: "shop-7".into(),
        customer: None,
        offer_price: Money::from_minor(price),
        currency_code: "AMD".into(),
    }
}

pub fn customer(phone: &str, tier: CustomerTier) -> Customer {
    Customer {
        phone: phone.into(),
        full_name: "Armen K.".into(),
        gender: Gender::Unspecified,
        notes: None,
        tier,
    }
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

// =============================================================================
// Scripted Store
// =============================================================================

/// In-memory [`DomainStore`] with call counters and failure injection.
#[derive(Default)]
pub struct ScriptedStore {
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    register_busy: AtomicBool,
    balance: Mutex<Money>,
    queued_balances: Mutex<VecDeque<(Money, Duration)>>,
    pending: Mutex<Option<PendingCashIn>>,
    queued_pending: Mutex<VecDeque<(Option<PendingCashIn>, Duration)>>,
    queued_intakes: Mutex<VecDeque<IntakeRecord>>,
    intake_delay: Mutex<Option<Duration>>,
    customer: Mutex<Option<Customer>>,
    lookup_delay: Mutex<Option<Duration>>,
    rates_delay: Mutex<Option<Duration>>,
    last_create: Mutex<Option<CreateIntakeRequest>>,
    last_iron: Mutex<Option<IronPurchaseRequest>>,
}

impl ScriptedStore {
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    pub fn set_register_busy(&self, busy: bool) {
        self.register_busy.store(busy, Ordering::SeqCst);
    }

    pub fn set_balance(&self, balance: Money) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn queue_balance(&self, balance: Money, delay: Duration) {
        self.queued_balances.lock().unwrap().push_back((balance, delay));
    }

    pub fn set_pending(&self, pending: Option<PendingCashIn>) {
        *self.pending.lock().unwrap() = pending;
    }

    pub fn queue_pending(&self, pending: Option<PendingCashIn>, delay: Duration) {
        self.queued_pending.lock().unwrap().push_back((pending, delay));
    }

    /// The next intake operation answers with `record`.
    pub fn queue_intake(&self, record: IntakeRecord) {
        self.queued_intakes.lock().unwrap().push_back(record);
    }

    pub fn delay_intakes(&self, delay: Duration) {
        *self.intake_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_customer(&self, customer: Option<Customer>) {
        *self.customer.lock().unwrap() = customer;
    }

    pub fn delay_lookups(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_exchange_rates(&self, delay: Duration) {
        *self.rates_delay.lock().unwrap() = Some(delay);
    }

    pub fn last_create(&self) -> Option<CreateIntakeRequest> {
        self.last_create.lock().unwrap().clone()
    }

    pub fn last_iron(&self) -> Option<IronPurchaseRequest> {
        self.last_iron.lock().unwrap().clone()
    }

    fn hit(&self, operation: &'static str) -> TerminalResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        if self.failing.lock().unwrap().contains(operation) {
            return Err(TerminalError::Rejected {
                operation,
                status: 422,
                message: "scripted failure".into(),
            });
        }
        Ok(())
    }

    async fn intake(&self, operation: &'static str) -> TerminalResult<IntakeRecord> {
        self.hit(operation)?;
        let delay = *self.intake_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queued_intakes.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| intake_record("41", 100_000)))
    }
}

#[async_trait]
impl DomainStore for ScriptedStore {
    async fn open_session(&self, cash_register_id: &str) -> TerminalResult<OpenedSession> {
        self.hit("open_session")?;
        if self.register_busy.load(Ordering::SeqCst) {
            return Err(TerminalError::RegisterBusy(cash_register_id.to_string()));
        }
        Ok(OpenedSession {
            session_id: "s-1".into(),
            balance: None,
        })
    }

    async fn close_session(&self, _cash_register_id: &str, _session_id: &str) -> TerminalResult<()> {
        self.hit("close_session")
    }

    async fn fetch_balance(&self, _cash_register_id: &str) -> TerminalResult<Money> {
        self.hit("fetch_balance")?;
        let queued = self.queued_balances.lock().unwrap().pop_front();
        match queued {
            Some((balance, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(balance)
            }
            None => Ok(*self.balance.lock().unwrap()),
        }
    }

    async fn fetch_pending_cash_in(
        &self,
        _cash_register_id: &str,
    ) -> TerminalResult<Option<PendingCashIn>> {
        self.hit("fetch_pending_cash_in")?;
        let queued = self.queued_pending.lock().unwrap().pop_front();
        match queued {
            Some((pending, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(pending)
            }
            None => Ok(self.pending.lock().unwrap().clone()),
        }
    }

    async fn confirm_pending_cash_in(&self, _cash_register_id: &str, _id: &str) -> TerminalResult<()> {
        self.hit("confirm_pending_cash_in")?;
        *self.pending.lock().unwrap() = None;
        Ok(())
    }

    async fn create_intake(&self, request: &CreateIntakeRequest) -> TerminalResult<IntakeRecord> {
        *self.last_create.lock().unwrap() = Some(request.clone());
        self.intake("create_intake").await
    }

    async fn fetch_intake(&self, _id: &str) -> TerminalResult<IntakeRecord> {
        self.intake("fetch_intake").await
    }

    async fn recalculate_intake(&self, _id: &str) -> TerminalResult<IntakeRecord> {
        self.intake("recalculate_intake").await
    }

    async fn attach_customer(&self, _id: &str, phone: &str) -> TerminalResult<IntakeRecord> {
        let mut record = self.intake("attach_customer").await?;
        let attached = self
            .customer
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| customer(phone, CustomerTier::Standard));
        record.customer = Some(attached);
        Ok(record)
    }

    async fn offer_intake(&self, _id: &str) -> TerminalResult<IntakeRecord> {
        self.intake("offer_intake").await
    }

    async fn accept_intake(&self, _id: &str, _phone: &str) -> TerminalResult<IntakeRecord> {
        self.intake("accept_intake").await
    }

    async fn reject_intake(&self, _id: &str) -> TerminalResult<()> {
        self.hit("reject_intake")
    }

    async fn fetch_offer_options(&self, _id: &str) -> TerminalResult<Vec<OfferOption>> {
        self.hit("fetch_offer_options")?;
        Ok(vec![OfferOption {
            id: "cash".into(),
            label: "Cash".into(),
            price: Money::from_minor(100_000),
        }])
    }

    async fn lookup_customer(&self, _phone: &str) -> TerminalResult<Option<Customer>> {
        self.hit("lookup_customer")?;
        let delay = *self.lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.customer.lock().unwrap().clone())
    }

    async fn fetch_exchange_rates(&self, _cash_register_id: &str) -> TerminalResult<Vec<ExchangeRate>> {
        self.hit("fetch_exchange_rates")?;
        let delay = *self.rates_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(vec![ExchangeRate {
            currency_code: "USD".into(),
            buy: Money::from_minor(38_500),
            sell: Money::from_minor(39_000),
        }])
    }

    async fn fetch_iron_catalog(&self, _cash_register_id: &str) -> TerminalResult<Vec<IronCatalogItem>> {
        self.hit("fetch_iron_catalog")?;
        Ok(vec![IronCatalogItem {
            id: "heavy".into(),
            name: "Heavy scrap".into(),
            price_per_kg: Money::from_minor(12_000),
        }])
    }

    async fn fetch_active_metal_rate(&self, _shop_id: &str) -> TerminalResult<MetalRate> {
        self.hit("fetch_active_metal_rate")?;
        Ok(MetalRate {
            currency_code: "AMD".into(),
            pt: Money::from_minor(1_200_000),
            pd: Money::from_minor(1_500_000),
            rh: Money::from_minor(5_000_000),
        })
    }

    async fn fetch_languages(&self) -> TerminalResult<Vec<Language>> {
        self.hit("fetch_languages")?;
        Ok(vec![Language {
            code: "hy".into(),
            name: "Armenian".into(),
        }])
    }

    async fn submit_iron_purchase(
        &self,
        request: &IronPurchaseRequest,
    ) -> TerminalResult<IronPurchaseReceipt> {
        self.hit("submit_iron_purchase")?;
        *self.last_iron.lock().unwrap() = Some(request.clone());
        let total = request
            .lines
            .iter()
            .fold(Money::zero(), |acc, line| acc + line.price);
        Ok(IronPurchaseReceipt {
            id: "iron-1".into(),
            total,
        })
    }
}

// =============================================================================
// Scripted Push Connection
// =============================================================================

/// Hands out [`ScriptedLink`]s and remembers them for inspection.
#[derive(Default)]
pub struct ScriptedConnector {
    links: Mutex<Vec<Arc<ScriptedLink>>>,
    connects: AtomicUsize,
    fail_next: AtomicBool,
}

impl ScriptedConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn link(&self, index: usize) -> Arc<ScriptedLink> {
        self.links.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn connect(
        &self,
        _token: &AccessToken,
    ) -> TerminalResult<(Arc<dyn PushLink>, mpsc::Receiver<TransportEvent>)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TerminalError::ConnectionFailed("scripted refusal".into()));
        }
        let (events_tx, events_rx) = mpsc::channel(16);
        let link = Arc::new(ScriptedLink {
            events: Mutex::new(Some(events_tx)),
            invocations: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            state: Mutex::new(ConnectionState::Connected),
        });
        self.links.lock().unwrap().push(link.clone());
        let link: Arc<dyn PushLink> = link;
        Ok((link, events_rx))
    }
}

/// A push link whose events are injected by the test.
pub struct ScriptedLink {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    stops: AtomicUsize,
    state: Mutex<ConnectionState>,
}

impl ScriptedLink {
    pub async fn push(&self, event: TransportEvent) {
        let events = self.events.lock().unwrap().clone();
        if let Some(events) = events {
            // The receiver is gone once the pump was aborted.
            let _ = events.send(event).await;
        }
    }

    /// Gives up like a transport out of retries: closes the event stream.
    pub fn die(&self) {
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        self.events.lock().unwrap().take();
    }

    pub async fn push_invocation(&self, target: &str) {
        self.push(TransportEvent::Invocation {
            target: target.into(),
            arguments: vec![Value::from("payload-is-ignored")],
        })
        .await;
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushLink for ScriptedLink {
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> TerminalResult<Option<Value>> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), arguments));
        Ok(None)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
    }

    async fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

// =============================================================================
// Recording Emitter
// =============================================================================

/// Keeps every emitted event.
#[derive(Default)]
pub struct RecordingEmitter {
    sessions: Mutex<Vec<Session>>,
    workflows: Mutex<Vec<WorkflowView>>,
    pendings: Mutex<Vec<Option<PendingTransaction>>>,
    balances: Mutex<Vec<BalanceView>>,
    channels: Mutex<Vec<ConnectionState>>,
    errors: Mutex<Vec<ErrorNotice>>,
}

impl RecordingEmitter {
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn workflows(&self) -> Vec<WorkflowView> {
        self.workflows.lock().unwrap().clone()
    }

    pub fn pendings(&self) -> Vec<Option<PendingTransaction>> {
        self.pendings.lock().unwrap().clone()
    }

    pub fn balances(&self) -> Vec<BalanceView> {
        self.balances.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<ConnectionState> {
        self.channels.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorNotice> {
        self.errors.lock().unwrap().clone()
    }
}

impl TerminalEventEmitter for RecordingEmitter {
    fn emit_session(&self, session: &Session) {
        self.sessions.lock().unwrap().push(session.clone());
    }

    fn emit_workflow(&self, view: &WorkflowView) {
        self.workflows.lock().unwrap().push(view.clone());
    }

    fn emit_pending(&self, pending: Option<&PendingTransaction>) {
        self.pendings.lock().unwrap().push(pending.cloned());
    }

    fn emit_balance(&self, balance: &BalanceView) {
        self.balances.lock().unwrap().push(*balance);
    }

    fn emit_channel(&self, state: ConnectionState) {
        self.channels.lock().unwrap().push(state);
    }

    fn emit_error(&self, notice: &ErrorNotice) {
        self.errors.lock().unwrap().push(notice.clone());
    }
}
