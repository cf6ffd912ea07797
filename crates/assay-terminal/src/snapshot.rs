//! # Local Snapshots
//!
//! The two files the terminal keeps between restarts:
//!
//! - `auth.json`: register id, access token and shop id. Written by the
//!   login flow, only ever read here.
//! - `session.json`: the last known session status, so an open session
//!   survives a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use assay_core::{Session, SessionStatus};

use crate::error::{TerminalError, TerminalResult};

const AUTH_FILE: &str = "auth.json";
const SESSION_FILE: &str = "session.json";

/// Authenticated-session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub cash_register_id: String,
    pub access_token: String,
    pub shop_id: String,
}

/// Last persisted state of the cash-register session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub cash_register_id: String,
    pub status: SessionStatus,
    pub open_session_id: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn of(session: &Session) -> Self {
        SessionSnapshot {
            cash_register_id: session.cash_register_id.clone(),
            status: session.status,
            open_session_id: session.open_session_id.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Rebuilds a session. The balance is refreshed separately.
    pub fn into_session(self) -> Session {
        Session {
            open_session_id: self.open_session_id,
            status: self.status,
            ..Session::closed(self.cash_register_id)
        }
    }
}

/// Reads and writes snapshot files in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads `auth.json`. A missing file is an error: nothing can run
    /// without a register and a token.
    pub fn load_auth(&self) -> TerminalResult<AuthSnapshot> {
        let path = self.dir.join(AUTH_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            TerminalError::Snapshot(format!("cannot read {}: {}", path.display(), e))
        })?;
        let auth: AuthSnapshot = serde_json::from_str(&contents)?;
        info!(cash_register_id = %auth.cash_register_id, "Loaded auth snapshot");
        Ok(auth)
    }

    /// Reads `session.json` if present.
    pub fn load_session(&self) -> TerminalResult<Option<SessionSnapshot>> {
        let path = self.dir.join(SESSION_FILE);
        if !path.exists() {
            debug!(?path, "No session snapshot");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Writes `session.json` atomically (temp file + rename).
    pub fn save_session(&self, snapshot: &SessionSnapshot) -> TerminalResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(SESSION_FILE);
        let tmp = self.dir.join(format!("{}.tmp", SESSION_FILE));
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(status = %snapshot.status, "Session snapshot saved");
        Ok(())
    }
}
