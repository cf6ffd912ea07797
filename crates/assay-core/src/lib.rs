//! # assay-core: Pure Intake Logic for the Operator Terminal
//!
//! Everything the operator terminal decides without talking to anyone:
//! domain types, input validation, the intake state machine and the
//! context planning rules. No I/O, no async runtime.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Operator Terminal                                   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Operator UI                                  │   │
//! │  │    forms, tabs, toasts                                          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ commands                               │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          assay-terminal (session, channel, engine)              │   │
//! │  │          REST store, hub transport, timers                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ assay-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ workflow  │  │   form    │  │ validation│  │   │
//! │  │   │  Intake   │  │  guards   │  │  raw text │  │  weights  │  │   │
//! │  │   │  Session  │  │  tickets  │  │  per tab  │  │  phones   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO TIMERS                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Session, Intake, PendingTransaction, ...)
//! - [`money`] - Money in integer minor units
//! - [`form`] - Raw operator input per tab
//! - [`validation`] - Weight, phone and iron line validation
//! - [`workflow`] - The intake state machine
//! - [`context`] - Reference data planning and the tab-switch gate
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use assay_core::form::OperatorFormState;
//! use assay_core::workflow::{IntakeWorkflow, WorkflowRules};
//! use assay_core::{IntakeStatus, Tab};
//!
//! let mut workflow = IntakeWorkflow::new("shop-7", Tab::Catalyst, WorkflowRules::default());
//! workflow.edit_form(|form| {
//!     if let OperatorFormState::Catalyst(f) = form {
//!         f.powder_weight_total = "12.5".into();
//!         f.phone = String::new();
//!     }
//! });
//!
//! // An empty phone never leaves the terminal.
//! assert!(workflow.begin_submit(true).is_err());
//! assert!(workflow.form().has_tried_submit());
//! assert_eq!(workflow.status(), IntakeStatus::None);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod context;
pub mod error;
pub mod form;
pub mod money;
pub mod types;
pub mod validation;
pub mod workflow;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;
