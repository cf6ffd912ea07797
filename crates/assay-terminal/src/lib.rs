//! # assay-terminal: Operator Terminal Orchestrator
//!
//! Drives one operator terminal of a precious-metal intake desk: the
//! cash-register session, the hub push channel, the pending cash-in slot,
//! the intake workflow and the reference data it needs.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Terminal (command surface)                        │
//! │                                                                         │
//! │  ┌────────────────┐   connect /    ┌────────────────┐                  │
//! │  │ Session        │───teardown────►│ Channel        │◄── hub events    │
//! │  │ Controller     │                │ Manager        │    (WebSocket)   │
//! │  └───────┬────────┘                └───────┬────────┘                  │
//! │          │ balance                          │ invalidate / resync       │
//! │          ▼                                  ▼                           │
//! │  ┌────────────────┐  refresh       ┌────────────────┐                  │
//! │  │ Balance        │◄───────────────│ Pending        │                  │
//! │  │ Ledger         │                │ Reconciler     │                  │
//! │  └────────────────┘                └────────────────┘                  │
//! │                                                                         │
//! │  ┌────────────────┐                ┌────────────────┐                  │
//! │  │ Intake         │  tab, tier ──► │ Context        │                  │
//! │  │ Engine         │                │ Resolver       │                  │
//! │  └────────────────┘                └────────────────┘                  │
//! │                                                                         │
//! │  Every REST call goes through the DomainStore trait (HttpStore).       │
//! │                                                                         │
//! │  EVENTS (to the UI via TerminalEventEmitter):                          │
//! │  • session, workflow, pending, balance, channel state                  │
//! │  • error: once per failed command                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Components
//! - [`session`] - Session Controller, open/close/restore
//! - [`channel`] - Real-Time Channel Manager over the hub
//! - [`reconciler`] - Pending cash-in slot and the resync routine
//! - [`engine`] - Intake Workflow Engine
//! - [`context`] - Context Resolver and the tab gate
//! - [`ledger`] - Drawer balance and its display timer
//! - [`terminal`] - `Terminal` and `TerminalBuilder`
//!
//! ### Plumbing
//! - [`config`] - Terminal configuration (terminal.toml + env)
//! - [`error`] - Terminal error types
//! - [`events`] - UI event emitter seam
//! - [`protocol`] - Hub wire messages
//! - [`transport`] - WebSocket hub client with reconnection
//! - [`store`] - Back office REST client
//! - [`snapshot`] - Auth and session snapshots on disk
//! - [`auth`] - Access token checks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use assay_terminal::{SnapshotStore, TerminalBuilder, TerminalConfig};
//!
//! let config = TerminalConfig::load(None)?;
//! let auth = SnapshotStore::new(config.snapshot_dir()?).load_auth()?;
//!
//! let terminal = TerminalBuilder::new(config, auth).build()?;
//! terminal.restore().await?;
//! terminal.open_session().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Components
pub mod channel;
pub mod context;
pub mod engine;
pub mod ledger;
pub mod reconciler;
pub mod session;
pub mod terminal;

// Plumbing
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod snapshot;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::AccessToken;
pub use channel::{ChannelListener, ChannelManager, ChannelTarget};
pub use config::TerminalConfig;
pub use context::{ContextResolver, ReferenceData};
pub use engine::IntakeEngine;
pub use error::{ErrorKind, TerminalError, TerminalResult};
pub use events::{BalanceView, ErrorNotice, NoOpEmitter, TerminalEventEmitter};
pub use ledger::BalanceLedger;
pub use reconciler::{PendingReconciler, Resync};
pub use session::SessionController;
pub use snapshot::{AuthSnapshot, SessionSnapshot, SnapshotStore};
pub use store::{DomainStore, HttpStore};
pub use terminal::{Terminal, TerminalBuilder};
pub use transport::{ConnectionState, HubConnector, PushConnector, PushLink, TransportEvent};
