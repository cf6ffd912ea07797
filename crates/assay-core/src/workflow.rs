//! # Intake Workflow
//!
//! The pure intake state machine. Every command is split into a `begin_*`
//! step (guards + validation, returns a [`Ticket`]) and a `complete_*`
//! step (applies the server's answer). The async engine in
//! assay-terminal performs the request in between.
//!
//! ## Command Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One Intake Command                                   │
//! │                                                                         │
//! │  begin_recalculate()                                                   │
//! │     ├── status not Created/Offered? ──► InvalidTransition              │
//! │     ├── another command running?    ──► Busy                           │
//! │     └── OK → Ticket { command, epoch, intake_id }                      │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │            (REST request, may take seconds)                            │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  complete_recalculate(ticket, record)                                  │
//! │     ├── ticket.epoch != epoch?   ──► Stale (reset happened, ignore)    │
//! │     ├── record.id != intake_id?  ──► IdentityMismatch                  │
//! │     └── OK → offer price updated, recalculations += 1                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Derived Flags
//! There is no `is_submitting` boolean stored next to the status. The
//! running command is a single tagged `Option<IntakeCommand>` and every
//! flag the UI needs is derived from it and from [`IntakeStatus`].

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::form::OperatorFormState;
use crate::types::{
    Customer, Intake, IntakeRecord, IntakeStatus, IronPurchaseLine, OfferOption, Tab,
};
use crate::validation::{
    validate_catalyst_form, validate_iron_form, validate_phone, CatalystSubmission, PhoneRegion,
    MIN_SUBMIT_PHONE_LENGTH,
};

// =============================================================================
// Commands
// =============================================================================

/// A command that talks to the back office on behalf of the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum IntakeCommand {
    Submit,
    Recalculate,
    AttachCustomer,
    Offer,
    Accept,
    Reject,
    IronPurchase,
}

impl fmt::Display for IntakeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeCommand::Submit => write!(f, "submit"),
            IntakeCommand::Recalculate => write!(f, "recalculate"),
            IntakeCommand::AttachCustomer => write!(f, "attach_customer"),
            IntakeCommand::Offer => write!(f, "offer"),
            IntakeCommand::Accept => write!(f, "accept"),
            IntakeCommand::Reject => write!(f, "reject"),
            IntakeCommand::IronPurchase => write!(f, "iron_purchase"),
        }
    }
}

/// Proof that a command passed its guards.
///
/// The `epoch` ties the eventual answer to the workflow generation that
/// issued it; a `reset` in the meantime makes the answer stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub command: IntakeCommand,
    pub epoch: u64,
    pub intake_id: Option<String>,
}

impl Ticket {
    /// The intake id the command was issued for.
    pub fn intake_id(&self) -> CoreResult<&str> {
        self.intake_id
            .as_deref()
            .ok_or(CoreError::MissingIntakeId(self.command))
    }
}

/// Result of applying a server answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The answer changed the workflow.
    Updated,
    /// The workflow was reset after the command started; nothing changed.
    Stale,
}

// =============================================================================
// Rules
// =============================================================================

/// Operator-facing validation knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRules {
    pub default_currency: String,
    pub min_submit_phone_length: usize,
    pub phone_region: PhoneRegion,
}

impl Default for WorkflowRules {
    fn default() -> Self {
        WorkflowRules {
            default_currency: "AMD".to_string(),
            min_submit_phone_length: MIN_SUBMIT_PHONE_LENGTH,
            phone_region: PhoneRegion::default(),
        }
    }
}

// =============================================================================
// Workflow View
// =============================================================================

/// Read-only picture of the workflow handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub intake: Intake,
    pub form: OperatorFormState,
    pub recalculations_amount: u32,
    pub offer_options: Vec<OfferOption>,
    pub running: Option<IntakeCommand>,
}

impl WorkflowView {
    pub fn is_submitting(&self) -> bool {
        self.running == Some(IntakeCommand::Submit)
    }
}

// =============================================================================
// Intake Workflow
// =============================================================================

/// The intake state machine for one operator terminal.
#[derive(Debug, Clone)]
pub struct IntakeWorkflow {
    rules: WorkflowRules,
    intake: Intake,
    form: OperatorFormState,
    recalculations: u32,
    offer_options: Vec<OfferOption>,
    running: Option<IntakeCommand>,
    epoch: u64,
}

impl IntakeWorkflow {
    /// Creates an empty workflow for a shop, starting on `tab`.
    pub fn new(shop_id: impl Into<String>, tab: Tab, rules: WorkflowRules) -> Self {
        let form = OperatorFormState::for_tab(tab, &rules.default_currency);
        IntakeWorkflow {
            rules,
            intake: Intake::empty(shop_id),
            form,
            recalculations: 0,
            offer_options: Vec::new(),
            running: None,
            epoch: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    pub fn status(&self) -> IntakeStatus {
        self.intake.status
    }

    pub fn form(&self) -> &OperatorFormState {
        &self.form
    }

    pub fn tab(&self) -> Tab {
        self.form.tab()
    }

    pub fn rules(&self) -> &WorkflowRules {
        &self.rules
    }

    /// Number of successful recalculations since the last reset.
    pub fn recalculations(&self) -> u32 {
        self.recalculations
    }

    pub fn offer_options(&self) -> &[OfferOption] {
        &self.offer_options
    }

    pub fn running(&self) -> Option<IntakeCommand> {
        self.running
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_submitting(&self) -> bool {
        self.running == Some(IntakeCommand::Submit)
    }

    /// True when switching tabs would throw work away.
    pub fn has_progress(&self) -> bool {
        self.intake.status.has_identity() || self.form.is_dirty()
    }

    pub fn view(&self) -> WorkflowView {
        WorkflowView {
            intake: self.intake.clone(),
            form: self.form.clone(),
            recalculations_amount: self.recalculations,
            offer_options: self.offer_options.clone(),
            running: self.running,
        }
    }

    /// Lets the UI layer write raw input into the active form.
    pub fn edit_form<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut OperatorFormState),
    {
        let tab = self.form.tab();
        edit(&mut self.form);
        if self.form.tab() != tab {
            // Tab changes go through switch_tab, never through an edit.
            self.form = OperatorFormState::for_tab(tab, &self.rules.default_currency);
        }
    }

    // =========================================================================
    // Guards
    // =========================================================================

    fn ensure_idle(&self, requested: IntakeCommand) -> CoreResult<()> {
        match self.running {
            Some(running) => Err(CoreError::Busy { running, requested }),
            None => Ok(()),
        }
    }

    fn ensure_status(&self, command: IntakeCommand, allowed: &[IntakeStatus]) -> CoreResult<()> {
        if allowed.contains(&self.intake.status) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                command,
                status: self.intake.status,
            })
        }
    }

    fn issue(&mut self, command: IntakeCommand) -> Ticket {
        self.running = Some(command);
        Ticket {
            command,
            epoch: self.epoch,
            intake_id: self.intake.id.clone(),
        }
    }

    fn require_id(&self, command: IntakeCommand) -> CoreResult<()> {
        if self.intake.id.is_some() {
            Ok(())
        } else {
            Err(CoreError::MissingIntakeId(command))
        }
    }

    /// Applies the identity check and clears the running command.
    fn settle(&mut self, ticket: &Ticket, record: &IntakeRecord) -> CoreResult<Applied> {
        if ticket.epoch != self.epoch {
            return Ok(Applied::Stale);
        }
        self.running = None;

        let expected = ticket.intake_id()?;
        if record.id != expected {
            return Err(CoreError::IdentityMismatch {
                expected: expected.to_string(),
                actual: record.id.clone(),
            });
        }
        Ok(Applied::Updated)
    }

    // =========================================================================
    // Submit
    // =========================================================================

    /// Guards and validates a catalyst submit.
    ///
    /// A validation failure flips `has_tried_submit` and leaves the status
    /// untouched.
    pub fn begin_submit(&mut self, session_open: bool) -> CoreResult<(Ticket, CatalystSubmission)> {
        let command = IntakeCommand::Submit;
        self.ensure_status(command, &[IntakeStatus::None])?;
        self.ensure_idle(command)?;
        if !session_open {
            return Err(CoreError::SessionClosed);
        }

        let submission = match &self.form {
            OperatorFormState::Catalyst(form) => {
                validate_catalyst_form(form, self.rules.min_submit_phone_length)
            }
            OperatorFormState::Iron(_) => {
                return Err(CoreError::InvalidTransition {
                    command,
                    status: self.intake.status,
                })
            }
        };

        match submission {
            Ok(submission) => Ok((self.issue(command), submission)),
            Err(e) => {
                self.form.mark_tried_submit();
                Err(e.into())
            }
        }
    }

    /// Applies the created intake: `None → Created`.
    pub fn complete_submit(
        &mut self,
        ticket: &Ticket,
        submission: CatalystSubmission,
        record: IntakeRecord,
    ) -> CoreResult<Applied> {
        if ticket.epoch != self.epoch {
            return Ok(Applied::Stale);
        }
        self.running = None;

        self.intake.id = Some(record.id);
        self.intake.weights = submission.weights;
        self.intake.currency_code = record.currency_code;
        self.intake.customer = Some(record.customer.unwrap_or(submission.customer));
        self.intake.offer_price = Some(record.offer_price);
        self.intake.status = IntakeStatus::Created;
        Ok(Applied::Updated)
    }

    /// Stores the offer options loaded for a freshly created intake.
    pub fn apply_offer_options(&mut self, ticket: &Ticket, options: Vec<OfferOption>) -> Applied {
        if ticket.epoch != self.epoch {
            return Applied::Stale;
        }
        self.offer_options = options;
        Applied::Updated
    }

    // =========================================================================
    // Recalculate
    // =========================================================================

    pub fn begin_recalculate(&mut self) -> CoreResult<Ticket> {
        let command = IntakeCommand::Recalculate;
        self.ensure_status(command, &[IntakeStatus::Created, IntakeStatus::Offered])?;
        self.ensure_idle(command)?;
        self.require_id(command)?;
        Ok(self.issue(command))
    }

    /// Refreshes the price of the same intake and bumps the counter.
    pub fn complete_recalculate(
        &mut self,
        ticket: &Ticket,
        record: IntakeRecord,
    ) -> CoreResult<Applied> {
        if self.settle(ticket, &record)? == Applied::Stale {
            return Ok(Applied::Stale);
        }
        self.intake.offer_price = Some(record.offer_price);
        self.intake.currency_code = record.currency_code;
        self.recalculations = self.recalculations.saturating_add(1);
        Ok(Applied::Updated)
    }

    // =========================================================================
    // Attach Customer
    // =========================================================================

    /// Returns the ticket and the phone normalized to E.164.
    pub fn begin_attach_customer(&mut self, phone: &str) -> CoreResult<(Ticket, String)> {
        let command = IntakeCommand::AttachCustomer;
        if !self.intake.status.has_identity() {
            return Err(CoreError::InvalidTransition {
                command,
                status: self.intake.status,
            });
        }
        self.ensure_idle(command)?;
        self.require_id(command)?;
        let phone = validate_phone(phone, self.rules.phone_region)?;
        Ok((self.issue(command), phone))
    }

    pub fn complete_attach_customer(
        &mut self,
        ticket: &Ticket,
        record: IntakeRecord,
    ) -> CoreResult<Applied> {
        if self.settle(ticket, &record)? == Applied::Stale {
            return Ok(Applied::Stale);
        }
        if record.customer.is_some() {
            self.intake.customer = record.customer;
        }
        Ok(Applied::Updated)
    }

    // =========================================================================
    // Offer / Accept / Reject
    // =========================================================================

    pub fn begin_offer(&mut self) -> CoreResult<Ticket> {
        let command = IntakeCommand::Offer;
        self.require_id(command)?;
        self.ensure_status(command, &[IntakeStatus::Created])?;
        self.ensure_idle(command)?;
        Ok(self.issue(command))
    }

    /// `Created → Offered`.
    pub fn complete_offer(&mut self, ticket: &Ticket, record: IntakeRecord) -> CoreResult<Applied> {
        if self.settle(ticket, &record)? == Applied::Stale {
            return Ok(Applied::Stale);
        }
        self.intake.offer_price = Some(record.offer_price);
        self.intake.status = IntakeStatus::Offered;
        Ok(Applied::Updated)
    }

    /// Accept needs a regionally valid phone: the attached customer's, or
    /// the one typed into the form.
    pub fn begin_accept(&mut self) -> CoreResult<(Ticket, String)> {
        let command = IntakeCommand::Accept;
        self.require_id(command)?;
        self.ensure_status(command, &[IntakeStatus::Created, IntakeStatus::Offered])?;
        self.ensure_idle(command)?;

        let raw = match (&self.intake.customer, &self.form) {
            (Some(Customer { phone, .. }), _) if !phone.trim().is_empty() => phone.clone(),
            (_, OperatorFormState::Catalyst(form)) => form.phone.clone(),
            _ => String::new(),
        };
        let phone = validate_phone(&raw, self.rules.phone_region)?;
        Ok((self.issue(command), phone))
    }

    /// `Created|Offered → Accepted`.
    pub fn complete_accept(&mut self, ticket: &Ticket, record: IntakeRecord) -> CoreResult<Applied> {
        if self.settle(ticket, &record)? == Applied::Stale {
            return Ok(Applied::Stale);
        }
        self.intake.offer_price = Some(record.offer_price);
        if record.customer.is_some() {
            self.intake.customer = record.customer;
        }
        self.intake.status = IntakeStatus::Accepted;
        Ok(Applied::Updated)
    }

    pub fn begin_reject(&mut self) -> CoreResult<Ticket> {
        let command = IntakeCommand::Reject;
        self.require_id(command)?;
        self.ensure_status(command, &[IntakeStatus::Created, IntakeStatus::Offered])?;
        self.ensure_idle(command)?;
        Ok(self.issue(command))
    }

    /// Marks the intake `Rejected` and immediately resets, so no rejected
    /// intake ever stays visible.
    pub fn complete_reject(&mut self, ticket: &Ticket) -> Applied {
        if ticket.epoch != self.epoch {
            return Applied::Stale;
        }
        self.intake.status = IntakeStatus::Rejected;
        self.reset();
        Applied::Updated
    }

    // =========================================================================
    // Iron Purchase
    // =========================================================================

    /// Guards and validates the iron form. Returns the lines and the
    /// optional customer phone.
    pub fn begin_iron_purchase(
        &mut self,
        session_open: bool,
    ) -> CoreResult<(Ticket, Vec<IronPurchaseLine>, Option<String>)> {
        let command = IntakeCommand::IronPurchase;
        self.ensure_idle(command)?;
        if !session_open {
            return Err(CoreError::SessionClosed);
        }

        let validated = match &self.form {
            OperatorFormState::Iron(form) => validate_iron_form(form).and_then(|lines| {
                let phone = form.phone.trim();
                if phone.is_empty() {
                    Ok((lines, None))
                } else {
                    validate_phone(phone, self.rules.phone_region).map(|p| (lines, Some(p)))
                }
            }),
            OperatorFormState::Catalyst(_) => {
                return Err(CoreError::InvalidTransition {
                    command,
                    status: self.intake.status,
                })
            }
        };

        match validated {
            Ok((lines, phone)) => Ok((self.issue(command), lines, phone)),
            Err(e) => {
                self.form.mark_tried_submit();
                Err(e.into())
            }
        }
    }

    /// A completed iron purchase clears the iron form.
    pub fn complete_iron_purchase(&mut self, ticket: &Ticket) -> Applied {
        if ticket.epoch != self.epoch {
            return Applied::Stale;
        }
        self.reset();
        Applied::Updated
    }

    // =========================================================================
    // Failure / Consistency / Reset
    // =========================================================================

    /// Releases the running command after a failed request. State stays at
    /// its last known good value.
    pub fn fail(&mut self, ticket: &Ticket) {
        if ticket.epoch == self.epoch && self.running == Some(ticket.command) {
            self.running = None;
        }
    }

    /// Applies an authoritative refetch after an identity mismatch. Only the
    /// server-owned fields are taken; the status is never moved.
    pub fn apply_refetched(&mut self, epoch: u64, record: IntakeRecord) -> Applied {
        if epoch != self.epoch || self.intake.id.as_deref() != Some(record.id.as_str()) {
            return Applied::Stale;
        }
        self.intake.offer_price = Some(record.offer_price);
        self.intake.currency_code = record.currency_code;
        if record.customer.is_some() {
            self.intake.customer = record.customer;
        }
        Applied::Updated
    }

    /// Returns intake, form, counter and options to their initial values.
    ///
    /// Usable from any state. Anything still in flight becomes stale.
    pub fn reset(&mut self) {
        self.reset_to(self.form.tab());
    }

    /// Resets and moves the form to another tab.
    pub fn switch_tab(&mut self, tab: Tab) {
        self.reset_to(tab);
    }

    fn reset_to(&mut self, tab: Tab) {
        let shop_id = std::mem::take(&mut self.intake.shop_id);
        self.intake = Intake::empty(shop_id);
        self.form = OperatorFormState::for_tab(tab, &self.rules.default_currency);
        self.recalculations = 0;
        self.offer_options.clear();
        self.running = None;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
