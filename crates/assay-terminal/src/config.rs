//! # Terminal Configuration
//!
//! Configuration management for the operator terminal.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ASSAY_API_URL=https://office.example/api                           │
//! │     ASSAY_HUB_URL=wss://office.example/hubs/cash-register              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/assay-terminal/terminal.toml (Linux)                     │
//! │     ~/Library/Application Support/com.assay.terminal/terminal.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # terminal.toml
//! [api]
//! base_url = "https://office.example/api"
//! request_timeout_secs = 15
//!
//! [hub]
//! url = "wss://office.example/hubs/cash-register"
//! initial_backoff_ms = 500
//! max_backoff_secs = 30
//!
//! [terminal]
//! phone_region = "AM"
//! balance_display_secs = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use assay_core::validation::{PhoneRegion, MIN_SUBMIT_PHONE_LENGTH};
use assay_core::workflow::WorkflowRules;

use crate::error::{TerminalError, TerminalResult};
use crate::transport::TransportConfig;

// =============================================================================
// REST API Settings
// =============================================================================

/// Back office REST settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL every REST path is joined onto.
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Hub Settings
// =============================================================================

/// Push hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// WebSocket URL of the cash-register hub.
    #[serde(default = "default_hub_url")]
    pub url: String,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Maximum reconnection attempts after a drop.
    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_retries: u32,

    /// Interval between keepalive pings (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_hub_url() -> String {
    "ws://localhost:5000/hubs/cash-register".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    15
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            url: default_hub_url(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: 0,
            ping_interval_secs: default_ping_interval(),
        }
    }
}

// =============================================================================
// Terminal Settings
// =============================================================================

/// Operator-facing behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Numbering plan used for customer phones.
    #[serde(default)]
    pub phone_region: PhoneRegion,

    /// A submit needs a phone strictly longer than this.
    #[serde(default = "default_min_phone_length")]
    pub min_submit_phone_length: usize,

    /// How long a revealed balance stays visible (seconds).
    #[serde(default = "default_balance_display")]
    pub balance_display_secs: u64,

    /// Currency preselected on a fresh catalyst form.
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Where `auth.json` and `session.json` live.
    /// Falls back to the platform data directory.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

fn default_min_phone_length() -> usize {
    MIN_SUBMIT_PHONE_LENGTH
}

fn default_balance_display() -> u64 {
    5
}

fn default_currency() -> String {
    "AMD".to_string()
}

impl Default for TerminalSettings {
    fn default() -> Self {
        TerminalSettings {
            phone_region: PhoneRegion::default(),
            min_submit_phone_length: default_min_phone_length(),
            balance_display_secs: default_balance_display(),
            default_currency: default_currency(),
            snapshot_dir: None,
        }
    }
}

// =============================================================================
// Main Terminal Configuration
// =============================================================================

/// Complete terminal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub terminal: TerminalSettings,
}

impl TerminalConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (terminal.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> TerminalResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading terminal config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| TerminalError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> TerminalResult<()> {
        let hub = url::Url::parse(&self.hub.url)?;
        if !matches!(hub.scheme(), "ws" | "wss") {
            return Err(TerminalError::InvalidUrl(format!(
                "Hub URL must start with ws:// or wss://, got: {}",
                self.hub.url
            )));
        }

        let api = url::Url::parse(&self.api.base_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(TerminalError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.terminal.default_currency.trim().is_empty() {
            return Err(TerminalError::InvalidConfig(
                "default_currency must not be empty".into(),
            ));
        }

        if self.hub.ping_interval_secs == 0 {
            return Err(TerminalError::InvalidConfig(
                "ping_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ASSAY_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Ok(url) = std::env::var("ASSAY_HUB_URL") {
            debug!(url = %url, "Overriding hub URL from environment");
            self.hub.url = url;
        }

        if let Ok(region) = std::env::var("ASSAY_PHONE_REGION") {
            match region.parse() {
                Ok(parsed) => self.terminal.phone_region = parsed,
                Err(_) => warn!(region = %region, "Unknown phone region in environment"),
            }
        }

        if let Ok(secs) = std::env::var("ASSAY_BALANCE_DISPLAY_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.terminal.balance_display_secs = s;
            }
        }

        if let Ok(dir) = std::env::var("ASSAY_SNAPSHOT_DIR") {
            self.terminal.snapshot_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "assay", "terminal")
            .map(|dirs| dirs.config_dir().join("terminal.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Directory holding the persisted snapshots.
    pub fn snapshot_dir(&self) -> TerminalResult<PathBuf> {
        if let Some(dir) = &self.terminal.snapshot_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("com", "assay", "terminal")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| TerminalError::InvalidConfig("No snapshot directory available".into()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn balance_display(&self) -> Duration {
        Duration::from_secs(self.terminal.balance_display_secs)
    }

    /// Transport settings for the hub connection.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            url: self.hub.url.clone(),
            connect_timeout: Duration::from_secs(self.hub.connect_timeout_secs),
            initial_backoff: Duration::from_millis(self.hub.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.hub.max_backoff_secs),
            max_retries: self.hub.max_retries,
            ping_interval: Duration::from_secs(self.hub.ping_interval_secs),
            ..Default::default()
        }
    }

    /// Validation rules handed to the intake workflow.
    pub fn workflow_rules(&self) -> WorkflowRules {
        WorkflowRules {
            default_currency: self.terminal.default_currency.clone(),
            min_submit_phone_length: self.terminal.min_submit_phone_length,
            phone_region: self.terminal.phone_region,
        }
    }
}
