//! Configuration types for the wager agent
//!
//! Values are resolved once at startup from, lowest precedence first:
//! built-in defaults, an optional TOML file, `CLI_*` environment variables
//! and command-line flags. The result is an immutable [`ClientConfig`].

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use wager_shared::utils::parse_duration;

/// Prefix for environment overrides (`CLI_ID`, `CLI_SERVER_ADDRESS`, ...)
pub const ENV_PREFIX: &str = "CLI";

/// How long connections live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPolicy {
    /// A fresh connection for every request/response exchange
    #[default]
    PerExchange,
    /// One connection for the whole batch phase, another per result query
    Persistent,
}

impl std::str::FromStr for ConnectionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-exchange" | "per_exchange" => Ok(ConnectionPolicy::PerExchange),
            "persistent" => Ok(ConnectionPolicy::Persistent),
            _ => anyhow::bail!("Invalid connection policy: {}", s),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be greater than 0")]
    ZeroBatchSize,

    #[error("server address is empty")]
    EmptyAddress,

    #[error("{0} must be at least 1")]
    ZeroAttempts(&'static str),

    #[error("connect timeout must be greater than 0")]
    ZeroConnectTimeout,
}

/// Client configuration, fixed for the lifetime of one run
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer id carried in every frame header
    pub peer_id: u8,

    /// Aggregation server `host:port`
    pub server_address: String,

    /// Pause after each acknowledged batch
    pub loop_period: Duration,

    /// Overall time budget for the run (None = unbounded)
    pub loop_lapse: Option<Duration>,

    /// Maximum bets per BET message
    pub batch_size: usize,

    /// Connection lifetime policy
    pub connection_policy: ConnectionPolicy,

    /// Timeout for a single connect attempt
    pub connect_timeout: Duration,

    /// Connect attempts before giving up (1 = no retry)
    pub connect_attempts: u32,

    /// Winners query attempts before giving up (1 = no retry)
    pub query_attempts: u32,

    /// Initial delay between winners query attempts, doubled after each one
    pub query_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: 1,
            server_address: "127.0.0.1:12345".to_string(),
            loop_period: Duration::ZERO,
            loop_lapse: None,
            batch_size: 100,
            connection_policy: ConnectionPolicy::PerExchange,
            connect_timeout: Duration::from_secs(5),
            connect_attempts: 1,
            query_attempts: 1,
            query_backoff: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.server_address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.connect_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("connect attempts"));
        }
        if self.query_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("query attempts"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        Ok(())
    }
}

/// Raw, partially specified settings from one configuration layer.
///
/// Durations stay strings here and are parsed in [`Settings::into_client_config`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub id: Option<u8>,
    pub server_address: Option<String>,
    pub loop_period: Option<String>,
    pub loop_lapse: Option<String>,
    pub batch_size: Option<usize>,
    pub connection_policy: Option<ConnectionPolicy>,
    pub connect_timeout: Option<String>,
    pub connect_attempts: Option<u32>,
    pub query_attempts: Option<u32>,
    pub query_backoff: Option<String>,
    pub log_level: Option<String>,
    pub bets_file: Option<PathBuf>,
}

impl Settings {
    /// Load the file layer (if any) and the `CLI_*` environment layer.
    ///
    /// A missing file is an error only when `required` is set.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        ::config::Config::builder()
            .add_source(::config::File::from(path).required(required))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration values")
    }

    /// Overlay `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(self, overrides: Settings) -> Settings {
        Settings {
            id: overrides.id.or(self.id),
            server_address: overrides.server_address.or(self.server_address),
            loop_period: overrides.loop_period.or(self.loop_period),
            loop_lapse: overrides.loop_lapse.or(self.loop_lapse),
            batch_size: overrides.batch_size.or(self.batch_size),
            connection_policy: overrides.connection_policy.or(self.connection_policy),
            connect_timeout: overrides.connect_timeout.or(self.connect_timeout),
            connect_attempts: overrides.connect_attempts.or(self.connect_attempts),
            query_attempts: overrides.query_attempts.or(self.query_attempts),
            query_backoff: overrides.query_backoff.or(self.query_backoff),
            log_level: overrides.log_level.or(self.log_level),
            bets_file: overrides.bets_file.or(self.bets_file),
        }
    }

    /// Resolve against defaults into a validated [`ClientConfig`].
    pub fn into_client_config(self) -> anyhow::Result<ClientConfig> {
        let defaults = ClientConfig::default();
        let duration = |value: Option<String>, name: &str| -> anyhow::Result<Option<Duration>> {
            value
                .map(|v| parse_duration(&v).with_context(|| format!("Invalid {}: {:?}", name, v)))
                .transpose()
        };

        let config = ClientConfig {
            peer_id: self.id.unwrap_or(defaults.peer_id),
            server_address: self.server_address.unwrap_or(defaults.server_address),
            loop_period: duration(self.loop_period, "loop period")?
                .unwrap_or(defaults.loop_period),
            loop_lapse: duration(self.loop_lapse, "loop lapse")?,
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            connection_policy: self
                .connection_policy
                .unwrap_or(defaults.connection_policy),
            connect_timeout: duration(self.connect_timeout, "connect timeout")?
                .unwrap_or(defaults.connect_timeout),
            connect_attempts: self.connect_attempts.unwrap_or(defaults.connect_attempts),
            query_attempts: self.query_attempts.unwrap_or(defaults.query_attempts),
            query_backoff: duration(self.query_backoff, "query backoff")?
                .unwrap_or(defaults.query_backoff),
        };
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
