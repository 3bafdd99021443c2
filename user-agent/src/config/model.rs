// src/config/model.rs

//! Configuration structures.
//!
//! Key responsibilities:
//! - Mirror the TOML tables (`Raw*`) with every field optional.
//! - Convert them into the fully-typed `Config` the agent runs with,
//!   applying defaults and rejecting values the pool cannot work with.

use serde::Deserialize;
use shared::constants::{
    CONSULTANT_PIPE_NAME, DEFAULT_PENDING_READS, DEFAULT_WORKER_COUNT, MAX_PROTECTED_FILES, PORT_NAME,
};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub logging:    LoggingConfig,
    pub filter:     FilterConfig,
    pub listener:   ListenerConfig,
    pub consultant: ConsultantConfig,
    pub metrics:    MetricsConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub port_name:          String,
    pub protected_capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub workers:          usize,
    pub pending_reads:    usize,
    /// `None`: workers block until a completion or wake-up arrives.
    pub poll_interval:    Option<Duration>,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsultantConfig {
    pub enable:       bool,
    /// Pipe name on Windows, socket path elsewhere.
    pub endpoint:     String,
    /// `None`: reads block until the consultant answers.
    pub read_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsConfig {
    pub listen: Option<SocketAddr>,
}

// ───── raw TOML tables ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)] pub logging:    LoggingConfig,
    #[serde(default)] pub filter:     RawFilter,
    #[serde(default)] pub listener:   RawListener,
    #[serde(default)] pub consultant: RawConsultant,
    #[serde(default)] pub metrics:    RawMetrics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFilter {
    pub port_name:          Option<String>,
    pub protected_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawListener {
    pub workers:          Option<usize>,
    pub pending_reads:    Option<usize>,
    pub poll_interval:    Option<String>,
    pub shutdown_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConsultant {
    pub enable:       Option<bool>,
    pub endpoint:     Option<String>,
    pub read_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMetrics {
    pub listen: Option<String>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration for {field} '{value}': {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid listen address '{value}': {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: &'static str },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub fn default_endpoint() -> String {
    if cfg!(windows) {
        CONSULTANT_PIPE_NAME.into()
    } else {
        "/run/avf/consultant.sock".into()
    }
}

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn duration(field: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            humantime::parse_duration(&v)
                .map_err(|source| ConfigError::InvalidDuration { field, value: v.clone(), source })
        })
        .transpose()
}

fn positive(field: &'static str, value: Option<usize>, default: usize) -> Result<usize, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Invalid { field, reason: "must be at least 1" }),
        n => Ok(n),
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let filter = FilterConfig {
            port_name: raw.filter.port_name.unwrap_or_else(|| PORT_NAME.into()),
            protected_capacity: positive(
                "filter.protected_capacity",
                raw.filter.protected_capacity,
                MAX_PROTECTED_FILES,
            )?,
        };

        let poll_interval = duration("listener.poll_interval", raw.listener.poll_interval)?;
        if poll_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid { field: "listener.poll_interval", reason: "must not be zero" });
        }
        let listener = ListenerConfig {
            workers: positive("listener.workers", raw.listener.workers, DEFAULT_WORKER_COUNT)?,
            pending_reads: positive("listener.pending_reads", raw.listener.pending_reads, DEFAULT_PENDING_READS)?,
            poll_interval,
            shutdown_timeout: duration("listener.shutdown_timeout", raw.listener.shutdown_timeout)?
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        };

        let consultant = ConsultantConfig {
            enable: raw.consultant.enable.unwrap_or(true),
            endpoint: raw.consultant.endpoint.unwrap_or_else(default_endpoint),
            read_timeout: duration("consultant.read_timeout", raw.consultant.read_timeout)?,
        };

        let metrics = MetricsConfig {
            listen: raw
                .metrics
                .listen
                .map(|v| v.parse::<SocketAddr>().map_err(|source| ConfigError::InvalidAddress { value: v.clone(), source }))
                .transpose()?,
        };

        Ok(Config { logging: raw.logging, filter, listener, consultant, metrics })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            filter: FilterConfig { port_name: PORT_NAME.into(), protected_capacity: MAX_PROTECTED_FILES },
            listener: ListenerConfig {
                workers: DEFAULT_WORKER_COUNT,
                pending_reads: DEFAULT_PENDING_READS,
                poll_interval: None,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
            consultant: ConsultantConfig { enable: true, endpoint: default_endpoint(), read_timeout: None },
            metrics: MetricsConfig::default(),
        }
    }
}
