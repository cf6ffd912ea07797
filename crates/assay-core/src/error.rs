//! # Error Types
//!
//! Domain-specific error types for assay-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  assay-core errors (this file)                                         │
//! │  ├── CoreError        - Workflow guard and consistency failures        │
//! │  └── ValidationError  - Local input validation failures                │
//! │                                                                         │
//! │  assay-terminal errors (separate crate)                                │
//! │  └── TerminalError    - Operation / connectivity / session failures    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → TerminalError → emit_error (UI)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation errors never reach the network: the command that produced
//! one is blocked and the form's `has_tried_submit` flag flips instead.

use thiserror::Error;

use crate::types::IntakeStatus;
use crate::workflow::IntakeCommand;

// =============================================================================
// Core Error
// =============================================================================

/// Intake workflow errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The command is not allowed from the current intake status.
    ///
    /// ## When This Occurs
    /// - `recalculate` before an intake was created
    /// - `offer` on an intake that is already accepted
    /// - `attach_customer` while the status is `None`
    #[error("{command} is not allowed while the intake is {status}")]
    InvalidTransition {
        command: IntakeCommand,
        status: IntakeStatus,
    },

    /// The command needs a server-assigned intake id and none is known.
    #[error("No intake id is known for {0}")]
    MissingIntakeId(IntakeCommand),

    /// Another command on the same intake is still in flight.
    #[error("{running} is still running, {requested} was not started")]
    Busy {
        running: IntakeCommand,
        requested: IntakeCommand,
    },

    /// The cash-register session is not open.
    #[error("Cash register session is not open")]
    SessionClosed,

    /// The server answered for a different record than the one requested.
    ///
    /// ## User Workflow
    /// ```text
    /// recalculate(intake 41)
    ///      │
    ///      ▼
    /// server returns intake 42   ← mismatch
    ///      │
    ///      ▼
    /// IdentityMismatch → local entry invalidated → fetch intake 41
    /// ```
    #[error("Server returned record {actual} while {expected} was requested")]
    IdentityMismatch { expected: String, actual: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when operator input doesn't meet requirements.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be longer than {min} characters")]
    TooShort { field: String, min: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., non-numeric weight, malformed phone).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A selection (catalog item, currency) was not made.
    #[error("{field} must be selected")]
    MissingSelection { field: String },
}

impl ValidationError {
    /// Returns the name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooShort { field, .. }
            | ValidationError::MustBePositive { field }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::MissingSelection { field } => field,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
