//! Store and logging configuration.
//!
//! # Responsibility
//! - Hold retry, busy-timeout and authority settings for the store.
//! - Load them from JSON with defaults for every omitted field.
//!
//! # Invariants
//! - `max_serialization_retries >= 1`.
//! - `retry_base_delay_ms <= retry_max_delay_ms`.
//! - `outbox_claim_lease_ms >= 1`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_MAX_SERIALIZATION_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 10;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 500;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_OUTBOX_CLAIM_LEASE_MS: u64 = 30_000;

/// Rule deciding which reporter supplies canonical state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityPolicy {
    /// The reporter that most recently submitted a changed view wins.
    #[default]
    LatestReporter,
    /// Reporter types in priority order, best first. Unlisted types rank last.
    Priority(Vec<String>),
}

impl AuthorityPolicy {
    /// Rank of a reporter type; lower is better.
    pub fn rank(&self, reporter_type: &str) -> usize {
        match self {
            Self::LatestReporter => 0,
            Self::Priority(order) => order
                .iter()
                .position(|candidate| candidate.eq_ignore_ascii_case(reporter_type))
                .unwrap_or(order.len()),
        }
    }

    /// Whether `challenger` may replace canonical state owned by `incumbent`.
    ///
    /// A tombstoned incumbent can always be replaced.
    pub fn may_replace(&self, challenger: &str, incumbent: &str, incumbent_live: bool) -> bool {
        if !incumbent_live {
            return true;
        }
        self.rank(challenger) <= self.rank(incumbent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_serialization_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub busy_timeout_ms: u64,
    /// How long a relay's claim on an outbox event blocks other relays.
    pub outbox_claim_lease_ms: u64,
    pub authority_policy: AuthorityPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_serialization_retries: DEFAULT_MAX_SERIALIZATION_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            outbox_claim_lease_ms: DEFAULT_OUTBOX_CLAIM_LEASE_MS,
            authority_policy: AuthorityPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_serialization_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_serialization_retries must be >= 1".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_base_delay_ms {} exceeds retry_max_delay_ms {}",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        if self.outbox_claim_lease_ms == 0 {
            return Err(ConfigError::Invalid(
                "outbox_claim_lease_ms must be >= 1".to_string(),
            ));
        }
        if let AuthorityPolicy::Priority(order) = &self.authority_policy {
            if order.iter().any(|reporter_type| reporter_type.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "authority_policy priority entries cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn outbox_claim_lease(&self) -> Duration {
        Duration::from_millis(self.outbox_claim_lease_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling and capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .retry_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// File logging settings consumed by `logging::init_logging`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: String,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, log_dir: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.into(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid store config: {err}"),
            Self::Invalid(message) => write!(f, "invalid store config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}
