//! # Terminal Error Types
//!
//! Error types for terminal operations.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Terminal Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │   Operation     │  │     Connectivity        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  local input,   │  │  REST rejection │  │  hub start / drop       │ │
//! │  │  never sent     │  │  operator may   │  │  logged, reconnected    │ │
//! │  │                 │  │  retry          │  │  transparently          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Consistency   │  │    Session      │  │   Config / Internal     │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  server echoed  │  │  open elsewhere │  │  bad terminal.toml,     │ │
//! │  │  another record │  │  no session id  │  │  snapshot I/O           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use assay_core::{CoreError, ValidationError};

/// Result type alias for terminal operations.
pub type TerminalResult<T> = Result<T, TerminalError>;

/// Category of a [`TerminalError`], as shown to the operator UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Operation,
    Connectivity,
    Consistency,
    Session,
    Config,
    Internal,
}

/// Terminal error type covering every failure a command can report.
#[derive(Debug, Error)]
pub enum TerminalError {
    // =========================================================================
    // Workflow Errors
    // =========================================================================
    /// Guard, validation or identity failure from the intake workflow.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Operation Errors (REST)
    // =========================================================================
    /// The back office rejected a request.
    #[error("{operation} was rejected ({status}): {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The back office could not be reached.
    #[error("{operation} failed: {message}")]
    RequestFailed {
        operation: &'static str,
        message: String,
    },

    /// Confirmation was requested while no cash-in is pending.
    #[error("No pending cash-in to confirm")]
    NothingPending,

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The register is open on another terminal.
    #[error("Cash register {0} is already open elsewhere")]
    RegisterBusy(String),

    /// Close was requested but no session id is known.
    #[error("No active session id is known for cash register {0}")]
    NoActiveSession(String),

    /// The access token is missing or expired.
    #[error("Access token is not valid: {0}")]
    InvalidToken(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// Failed to establish the hub connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Hub disconnected.
    #[error("Disconnected from hub")]
    Disconnected,

    /// Connection or invocation timeout.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The hub answered an invocation with an error.
    #[error("Hub method {method} failed: {message}")]
    HubInvocation { method: String, message: String },

    /// A hub frame could not be decoded.
    #[error("Invalid hub message: {0}")]
    InvalidMessage(String),

    // =========================================================================
    // Config Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Snapshot file could not be read or written.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The terminal is shutting down.
    #[error("Terminal is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for TerminalError {
    fn from(err: ValidationError) -> Self {
        TerminalError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for TerminalError {
    fn from(err: serde_json::Error) -> Self {
        TerminalError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for TerminalError {
    fn from(err: url::ParseError) -> Self {
        TerminalError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TerminalError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TerminalError::Disconnected,
            WsError::Io(io) => TerminalError::ConnectionFailed(io.to_string()),
            other => TerminalError::WebSocket(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TerminalError {
    fn from(err: std::io::Error) -> Self {
        TerminalError::Snapshot(err.to_string())
    }
}

impl From<toml::de::Error> for TerminalError {
    fn from(err: toml::de::Error) -> Self {
        TerminalError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl TerminalError {
    /// Classifies the error for the operator UI.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TerminalError::Core(core) => match core {
                CoreError::Validation(_) => ErrorKind::Validation,
                CoreError::IdentityMismatch { .. } => ErrorKind::Consistency,
                CoreError::SessionClosed => ErrorKind::Session,
                CoreError::InvalidTransition { .. }
                | CoreError::MissingIntakeId(_)
                | CoreError::Busy { .. } => ErrorKind::Operation,
            },
            TerminalError::Rejected { .. }
            | TerminalError::RequestFailed { .. }
            | TerminalError::NothingPending => ErrorKind::Operation,
            TerminalError::RegisterBusy(_)
            | TerminalError::NoActiveSession(_)
            | TerminalError::InvalidToken(_) => ErrorKind::Session,
            TerminalError::ConnectionFailed(_)
            | TerminalError::Disconnected
            | TerminalError::Timeout(_)
            | TerminalError::WebSocket(_)
            | TerminalError::HubInvocation { .. }
            | TerminalError::InvalidMessage(_) => ErrorKind::Connectivity,
            TerminalError::InvalidConfig(_)
            | TerminalError::InvalidUrl(_)
            | TerminalError::ConfigLoadFailed(_) => ErrorKind::Config,
            TerminalError::Snapshot(_)
            | TerminalError::Serialization(_)
            | TerminalError::ShuttingDown
            | TerminalError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the operator may retry the same command.
    ///
    /// ## Retryable Errors
    /// - Back office unreachable or rejecting with a 5xx
    /// - Consistency errors (the refetch already repaired local state)
    /// - Hub connectivity failures
    pub fn is_retryable(&self) -> bool {
        match self {
            TerminalError::RequestFailed { .. } => true,
            TerminalError::Rejected { status, .. } => *status >= 500,
            TerminalError::Core(CoreError::IdentityMismatch { .. }) => true,
            TerminalError::Core(CoreError::Busy { .. }) => true,
            other => other.kind() == ErrorKind::Connectivity,
        }
    }

    /// True for the outcome of a command whose result arrived after teardown.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, TerminalError::ShuttingDown)
    }
}
