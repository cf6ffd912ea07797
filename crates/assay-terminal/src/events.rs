//! Events pushed from the terminal to the operator UI.

use serde::Serialize;

use assay_core::workflow::WorkflowView;
use assay_core::{Money, PendingTransaction, Session};

use crate::error::{ErrorKind, TerminalError};
use crate::transport::ConnectionState;

/// Balance as the UI may show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub balance: Money,
    pub visible: bool,
}

/// An error as delivered to the toast sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&TerminalError> for ErrorNotice {
    fn from(err: &TerminalError) -> Self {
        ErrorNotice {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Trait for emitting terminal events (implemented by the UI integration).
pub trait TerminalEventEmitter: Send + Sync {
    /// Session opened, closed or restored.
    fn emit_session(&self, session: &Session);

    /// Intake or form changed.
    fn emit_workflow(&self, view: &WorkflowView);

    /// The pending cash-in slot changed.
    fn emit_pending(&self, pending: Option<&PendingTransaction>);

    /// Balance refreshed, revealed or hidden.
    fn emit_balance(&self, balance: &BalanceView);

    fn emit_channel(&self, state: ConnectionState);

    /// A command failed. Called exactly once per failure.
    fn emit_error(&self, notice: &ErrorNotice);
}

/// No-op event emitter for headless use and tests.
pub struct NoOpEmitter;

impl TerminalEventEmitter for NoOpEmitter {
    fn emit_session(&self, _session: &Session) {}
    fn emit_workflow(&self, _view: &WorkflowView) {}
    fn emit_pending(&self, _pending: Option<&PendingTransaction>) {}
    fn emit_balance(&self, _balance: &BalanceView) {}
    fn emit_channel(&self, _state: ConnectionState) {}
    fn emit_error(&self, _notice: &ErrorNotice) {}
}
