//! Configuration loading and representation.
//!
//! Everything comes from environment variables. [`LedgerConfig::from_lookup`]
//! takes any lookup function so tests never touch the process environment.

use core::str::FromStr;

use thiserror::Error;

pub const ENV_NOTIFIER: &str = "STOCK_LEDGER_NOTIFIER";
pub const ENV_REDIS_URL: &str = "STOCK_LEDGER_REDIS_URL";
pub const ENV_REDIS_CHANNEL: &str = "STOCK_LEDGER_REDIS_CHANNEL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "STOCK_LEDGER_MAX_CONFLICT_RETRIES";

pub const DEFAULT_REDIS_CHANNEL: &str = "stock-ledger.notifications";
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var} is required when {because}")]
    Missing {
        var: &'static str,
        because: &'static str,
    },

    #[error("notifier '{0}' is not available in this build")]
    Unsupported(String),
}

/// Where stock notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationMode {
    /// Structured log lines.
    #[default]
    Log,
    /// Dropped.
    Noop,
    /// In-process event bus.
    Bus,
    /// Redis pub/sub channel.
    Redis,
}

impl FromStr for NotificationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "" => Ok(Self::Log),
            "noop" | "none" => Ok(Self::Noop),
            "bus" => Ok(Self::Bus),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Invalid {
                var: ENV_NOTIFIER,
                reason: format!("unknown notifier '{other}' (expected log, noop, bus or redis)"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub channel: String,
}

/// Runtime configuration for the ledger engine and its adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub notifier: NotificationMode,
    pub redis: Option<RedisConfig>,
    pub database_url: Option<String>,
    /// How many times an adjustment is re-decided after a version conflict.
    pub max_conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            notifier: NotificationMode::Log,
            redis: None,
            database_url: None,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let notifier = match get(ENV_NOTIFIER) {
            Some(v) => v.parse()?,
            None => NotificationMode::default(),
        };

        let redis = match get(ENV_REDIS_URL) {
            Some(url) => Some(RedisConfig {
                url,
                channel: get(ENV_REDIS_CHANNEL).unwrap_or_else(|| DEFAULT_REDIS_CHANNEL.to_string()),
            }),
            None => None,
        };
        if notifier == NotificationMode::Redis && redis.is_none() {
            return Err(ConfigError::Missing {
                var: ENV_REDIS_URL,
                because: "STOCK_LEDGER_NOTIFIER=redis",
            });
        }

        let max_conflict_retries = match get(ENV_MAX_CONFLICT_RETRIES) {
            Some(v) => v.trim().parse().map_err(|e| ConfigError::Invalid {
                var: ENV_MAX_CONFLICT_RETRIES,
                reason: format!("{e}"),
            })?,
            None => DEFAULT_MAX_CONFLICT_RETRIES,
        };

        Ok(Self {
            notifier,
            redis,
            database_url: get(ENV_DATABASE_URL),
            max_conflict_retries,
        })
    }
}
