//! # Hub Protocol Messages
//!
//! Wire format of the cash-register hub.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Hub Protocol (JSON, v1)                            │
//! │                                                                         │
//! │  HANDSHAKE                                                             │
//! │  ─────────                                                             │
//! │  TERMINAL ───► {"protocol":"json","version":1}␞                        │
//! │  HUB      ◄─── {}␞                     (or {"error":"..."}␞)           │
//! │                                                                         │
//! │  INVOKE (terminal → hub)                                               │
//! │  ───────────────────────                                               │
//! │  TERMINAL ───► {"type":1,"invocationId":"7","target":"JoinCash...",    │
//! │                 "arguments":["reg-1"]}␞                                │
//! │  HUB      ◄─── {"type":3,"invocationId":"7"}␞   (or "error":"...")     │
//! │                                                                         │
//! │  PUSH (hub → terminal)                                                 │
//! │  ─────────────────────                                                 │
//! │  HUB      ───► {"type":1,"target":"ReceivePendingCashIn",              │
//! │                 "arguments":[{...}]}␞                                  │
//! │                                                                         │
//! │  KEEPALIVE / CLOSE                                                     │
//! │  ─────────────────                                                     │
//! │  Both     ◄──► {"type":6}␞                                             │
//! │  HUB      ───► {"type":7,"error":"...","allowReconnect":true}␞         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every message is terminated by the ASCII record separator `0x1E` (␞).
//! One WebSocket text frame may carry several messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TerminalError, TerminalResult};

/// Message terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub protocol version spoken by the terminal.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hub method that subscribes the connection to one register's events.
pub const JOIN_GROUP_METHOD: &str = "JoinCashRegisterGroup";

// =============================================================================
// Hub Events
// =============================================================================

/// Server-pushed events the terminal reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubEvent {
    PendingCashInCreated,
    ReceivePendingCashIn,
}

impl HubEvent {
    pub fn from_target(target: &str) -> Option<Self> {
        match target {
            "PendingCashInCreated" => Some(HubEvent::PendingCashInCreated),
            "ReceivePendingCashIn" => Some(HubEvent::ReceivePendingCashIn),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::PendingCashInCreated => "PendingCashInCreated",
            HubEvent::ReceivePendingCashIn => "ReceivePendingCashIn",
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// One decoded hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// A method call. From the hub this is a push event; from the terminal
    /// it carries an `invocation_id` and expects a completion.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },

    /// Result of an invocation.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },

    Ping,

    /// The hub is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },

    /// Streaming and cancellation messages; the terminal never uses them.
    Unsupported(u8),
}

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Flat wire shape. The numeric `type` field rules out serde's tagged enums.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl HubMessage {
    /// A terminal → hub invocation that expects a completion.
    pub fn invoke(invocation_id: impl Into<String>, target: &str, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id: Some(invocation_id.into()),
            target: target.to_string(),
            arguments,
        }
    }

    /// Short name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            HubMessage::Invocation { .. } => "invocation",
            HubMessage::Completion { .. } => "completion",
            HubMessage::Ping => "ping",
            HubMessage::Close { .. } => "close",
            HubMessage::Unsupported(_) => "unsupported",
        }
    }

    /// Serializes the message including its terminator.
    pub fn to_frame(&self) -> TerminalResult<String> {
        let raw = match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawMessage {
                kind: INVOCATION,
                invocation_id: invocation_id.clone(),
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..Default::default()
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => RawMessage {
                kind: COMPLETION,
                invocation_id: Some(invocation_id.clone()),
                result: result.clone(),
                error: error.clone(),
                ..Default::default()
            },
            HubMessage::Ping => RawMessage {
                kind: PING,
                ..Default::default()
            },
            HubMessage::Close {
                error,
                allow_reconnect,
            } => RawMessage {
                kind: CLOSE,
                error: error.clone(),
                allow_reconnect: Some(*allow_reconnect),
                ..Default::default()
            },
            HubMessage::Unsupported(kind) => {
                return Err(TerminalError::InvalidMessage(format!(
                    "message type {} cannot be sent",
                    kind
                )))
            }
        };

        let mut frame = serde_json::to_string(&raw)?;
        frame.push(RECORD_SEPARATOR);
        Ok(frame)
    }

    /// Decodes one message (without its terminator).
    pub fn from_json(json: &str) -> TerminalResult<Self> {
        let raw: RawMessage = serde_json::from_str(json)
            .map_err(|e| TerminalError::InvalidMessage(e.to_string()))?;

        match raw.kind {
            INVOCATION => Ok(HubMessage::Invocation {
                invocation_id: raw.invocation_id,
                target: raw
                    .target
                    .ok_or_else(|| TerminalError::InvalidMessage("invocation without target".into()))?,
                arguments: raw.arguments.unwrap_or_default(),
            }),
            COMPLETION => Ok(HubMessage::Completion {
                invocation_id: raw.invocation_id.ok_or_else(|| {
                    TerminalError::InvalidMessage("completion without invocationId".into())
                })?,
                result: raw.result,
                error: raw.error,
            }),
            PING => Ok(HubMessage::Ping),
            CLOSE => Ok(HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            }),
            other => Ok(HubMessage::Unsupported(other)),
        }
    }
}

/// Splits a text frame into decoded messages.
pub fn parse_frames(text: &str) -> Vec<TerminalResult<HubMessage>> {
    text.split(RECORD_SEPARATOR)
        .filter(|part| !part.trim().is_empty())
        .map(HubMessage::from_json)
        .collect()
}

// =============================================================================
// Handshake
// =============================================================================

#[derive(Debug, Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// The first frame the terminal sends.
pub fn handshake_request() -> TerminalResult<String> {
    let mut frame = serde_json::to_string(&HandshakeRequest {
        protocol: "json",
        version: PROTOCOL_VERSION,
    })?;
    frame.push(RECORD_SEPARATOR);
    Ok(frame)
}

/// Checks the handshake answer and returns whatever followed it in the
/// same frame.
pub fn parse_handshake_response(text: &str) -> TerminalResult<&str> {
    let (head, rest) = text.split_once(RECORD_SEPARATOR).ok_or_else(|| {
        TerminalError::InvalidMessage("handshake response without terminator".into())
    })?;
    let response: HandshakeResponse = serde_json::from_str(head)
        .map_err(|e| TerminalError::InvalidMessage(format!("handshake response: {}", e)))?;
    match response.error {
        Some(error) => Err(TerminalError::ConnectionFailed(format!(
            "hub refused handshake: {}",
            error
        ))),
        None => Ok(rest),
    }
}
