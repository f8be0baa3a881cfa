//! # Engine Configuration
//!
//! Configuration for the engine, its worker and the HTTP surface.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     WASHPASS_DATABASE_PATH=/var/lib/washpass/washpass.db               │
//! │     WASHPASS_GATEWAY_TOKEN=...                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/washpass/washpass.toml (Linux)                           │
//! │     ~/Library/Application Support/com.washpass.washpass/ (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # washpass.toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [database]
//! path = "./washpass.db"
//! max_connections = 5
//!
//! [gateway]
//! base_url = "https://eu-test.oppwa.com"
//! entity_id = "8a8294174b7ecb28014b9699220015ca"
//! currency = "SAR"
//!
//! [rewards]
//! bonus_units = 2
//! reward_validity_days = 30
//!
//! [reminders]
//! feedback_delay_secs = 1800
//!
//! [worker]
//! poll_interval_secs = 5
//! max_attempts = 8
//! ```
//!
//! The gateway access token belongs in the environment
//! (`WASHPASS_GATEWAY_TOKEN`), not in the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use washpass_core::{REFERRAL_BONUS_UNITS, REFERRAL_REWARD_VALIDITY_DAYS};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> String {
    "./washpass.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// =============================================================================
// Payment Gateway
// =============================================================================

/// Result codes the gateway uses for a successful debit.
pub const DEFAULT_SUCCESS_CODES: &[&str] = &[
    "000.000.000",
    "000.000.100",
    "000.100.110",
    "000.100.111",
    "000.100.112",
    "000.300.000",
];

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Merchant entity the checkouts are created for.
    #[serde(default)]
    pub entity_id: String,

    /// Bearer token for the gateway API. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub access_token: String,

    /// ISO 4217 currency of every checkout.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Result codes treated as a successful payment. Anything else fails.
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<String>,

    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "https://eu-test.oppwa.com".to_string()
}

fn default_currency() -> String {
    "SAR".to_string()
}

fn default_success_codes() -> Vec<String> {
    DEFAULT_SUCCESS_CODES.iter().map(|c| c.to_string()).collect()
}

fn default_gateway_timeout() -> u64 {
    15
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            base_url: default_gateway_url(),
            entity_id: String::new(),
            access_token: String::new(),
            currency: default_currency(),
            success_codes: default_success_codes(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl GatewayConfig {
    /// True when `code` is on the success allow-list.
    pub fn is_success_code(&self, code: &str) -> bool {
        self.success_codes.iter().any(|c| c == code)
    }

    /// True when credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.entity_id.is_empty() && !self.access_token.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Keeps the token out of logs.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("entity_id", &self.entity_id)
            .field("access_token", &"<redacted>")
            .field("currency", &self.currency)
            .field("success_codes", &self.success_codes)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// =============================================================================
// Rewards
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Units granted to each side of a referral.
    #[serde(default = "default_bonus_units")]
    pub bonus_units: i64,

    /// Validity of a reward entitlement created for an inviter.
    #[serde(default = "default_reward_validity_days")]
    pub reward_validity_days: i64,
}

fn default_bonus_units() -> i64 {
    REFERRAL_BONUS_UNITS
}

fn default_reward_validity_days() -> i64 {
    REFERRAL_REWARD_VALIDITY_DAYS
}

impl Default for RewardsConfig {
    fn default() -> Self {
        RewardsConfig {
            bonus_units: default_bonus_units(),
            reward_validity_days: default_reward_validity_days(),
        }
    }
}

// =============================================================================
// Reminders
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_true")]
    pub feedback_enabled: bool,

    /// Delay between a wash and the feedback reminder.
    #[serde(default = "default_feedback_delay")]
    pub feedback_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_feedback_delay() -> u64 {
    30 * 60
}

impl Default for RemindersConfig {
    fn default() -> Self {
        RemindersConfig {
            feedback_enabled: true,
            feedback_delay_secs: default_feedback_delay(),
        }
    }
}

impl RemindersConfig {
    pub fn feedback_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.feedback_delay_secs as i64)
    }
}

// =============================================================================
// Worker
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Tasks claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts before a task is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_attempts() -> i64 {
    8
}

fn default_base_backoff() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    60 * 60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl WorkerConfig {
    /// Delay before retry number `attempts` (1-based): doubles from the base
    /// up to the cap.
    pub fn backoff(&self, attempts: i64) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
        let secs = self
            .base_backoff_secs
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_backoff_secs);
        chrono::Duration::seconds(secs as i64)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WashpassConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub rewards: RewardsConfig,

    #[serde(default)]
    pub reminders: RemindersConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

impl WashpassConfig {
    /// Built-in defaults, replaced by `washpass.toml` when one exists, then
    /// patched by `WASHPASS_*` variables. The result is validated.
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Reading washpass.toml");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "No washpass.toml, keeping built-in defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Rejects settings the service cannot start with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(EngineError::InvalidConfig(format!(
                "server.bind_addr is not a socket address: {}",
                self.server.bind_addr
            )));
        }

        if self.database.path.trim().is_empty() {
            return Err(EngineError::InvalidConfig("database.path is empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        let url = Url::parse(&self.gateway.base_url).map_err(|e| {
            EngineError::InvalidConfig(format!("gateway.base_url is invalid: {}", e))
        })?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(EngineError::InvalidConfig(format!(
                "gateway.base_url must be http(s), got: {}",
                url.scheme()
            )));
        }
        if self.gateway.success_codes.is_empty() {
            return Err(EngineError::InvalidConfig(
                "gateway.success_codes must not be empty".into(),
            ));
        }

        if self.rewards.bonus_units <= 0 || self.rewards.reward_validity_days <= 0 {
            return Err(EngineError::InvalidConfig(
                "rewards.bonus_units and rewards.reward_validity_days must be positive".into(),
            ));
        }

        if self.worker.batch_size == 0 || self.worker.poll_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "worker.batch_size and worker.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.worker.max_attempts <= 0 {
            return Err(EngineError::InvalidConfig(
                "worker.max_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `WASHPASS_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("WASHPASS_BIND_ADDR") {
            debug!(bind_addr = %addr, "Overriding bind address from environment");
            self.server.bind_addr = addr;
        }

        if let Some(path) = lookup("WASHPASS_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = path;
        }

        if let Some(url) = lookup("WASHPASS_GATEWAY_URL") {
            debug!(url = %url, "Overriding gateway URL from environment");
            self.gateway.base_url = url;
        }

        if let Some(entity_id) = lookup("WASHPASS_GATEWAY_ENTITY_ID") {
            self.gateway.entity_id = entity_id;
        }

        if let Some(token) = lookup("WASHPASS_GATEWAY_TOKEN") {
            self.gateway.access_token = token;
        }

        if let Some(delay) = lookup("WASHPASS_FEEDBACK_DELAY_SECS") {
            match delay.parse::<u64>() {
                Ok(secs) => self.reminders.feedback_delay_secs = secs,
                Err(_) => warn!(value = %delay, "Ignoring invalid WASHPASS_FEEDBACK_DELAY_SECS"),
            }
        }

        if let Some(interval) = lookup("WASHPASS_WORKER_POLL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.worker.poll_interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid WASHPASS_WORKER_POLL_SECS"),
            }
        }
    }

    /// `<platform config dir>/washpass/washpass.toml`
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "washpass", "washpass")
            .map(|dirs| dirs.config_dir().join("washpass.toml"))
    }
}
