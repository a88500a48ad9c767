//! Environment-driven configuration.
//!
//! Every value is optional and falls back to the deployment defaults. A value
//! that is present but does not parse is a startup error.

use std::str::FromStr;
use std::time::Duration;

use crate::workers::{Backoff, DeliveryMode, WorkerConfig};

pub const DEFAULT_REDIS_HOST: &str = "redis";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_QUEUE_NAME: &str = "tasks_queue";
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SIMULATED_WORK: Duration = Duration::from_millis(1000);
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            message: message.into(),
        }
    }
}

/// Variable lookup; `std::env::var` in production, a map in tests.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn read(lookup: Lookup<'_>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(lookup: Lookup<'_>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match read(lookup, var) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::invalid(var, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}

/// Location of the queue in Redis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub redis_url: String,
    pub queue_name: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// `REDIS_URL` wins over `REDIS_HOST`/`REDIS_PORT`.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let redis_url = match read(lookup, "REDIS_URL") {
            Some(url) => url,
            None => {
                let host = read(lookup, "REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.into());
                let port: u16 = parse_or(lookup, "REDIS_PORT", DEFAULT_REDIS_PORT)?;
                format!("redis://{host}:{port}")
            }
        };
        let queue_name = read(lookup, "QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.into());

        Ok(Self {
            redis_url,
            queue_name,
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: format!("redis://{DEFAULT_REDIS_HOST}:{DEFAULT_REDIS_PORT}"),
            queue_name: DEFAULT_QUEUE_NAME.into(),
        }
    }
}

/// Worker loop tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Name carried on log events; `WORKER_NAME`, else `worker-<pid>`.
    pub name: String,
    pub dequeue_timeout: Duration,
    pub backoff: Backoff,
    pub delivery: DeliveryMode,
    /// How long the simulated processor "works" on each job.
    pub simulated_work: Duration,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Backoff::default();

        let dequeue_timeout = Duration::from_secs(parse_or(
            lookup,
            "DEQUEUE_TIMEOUT_SECS",
            DEFAULT_DEQUEUE_TIMEOUT.as_secs(),
        )?);

        let base_ms: u64 = parse_or(lookup, "WORKER_COOLDOWN_MS", millis(defaults.base))?;
        let max_ms: u64 = parse_or(lookup, "WORKER_MAX_COOLDOWN_MS", millis(defaults.max))?;
        if max_ms < base_ms {
            return Err(ConfigError::invalid(
                "WORKER_MAX_COOLDOWN_MS",
                format!("{max_ms} is below WORKER_COOLDOWN_MS ({base_ms})"),
            ));
        }
        let jitter: f64 = parse_or(lookup, "WORKER_COOLDOWN_JITTER", defaults.jitter)?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::invalid(
                "WORKER_COOLDOWN_JITTER",
                format!("{jitter} is outside 0.0..=1.0"),
            ));
        }
        let backoff = Backoff::exponential(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
        .with_jitter(jitter);

        let delivery = match read(lookup, "DELIVERY_MODE") {
            None => DeliveryMode::AtMostOnce,
            Some(raw) => {
                let visibility = Duration::from_secs(parse_or(
                    lookup,
                    "VISIBILITY_TIMEOUT_SECS",
                    DEFAULT_VISIBILITY_TIMEOUT.as_secs(),
                )?);
                DeliveryMode::parse(&raw, visibility)
                    .ok_or_else(|| ConfigError::invalid("DELIVERY_MODE", format!("unknown mode {raw:?}")))?
            }
        };

        let simulated_work = Duration::from_millis(parse_or(
            lookup,
            "JOB_SIMULATED_WORK_MS",
            millis(DEFAULT_SIMULATED_WORK),
        )?);

        Ok(Self {
            name: read(lookup, "WORKER_NAME").unwrap_or_else(default_worker_name),
            dequeue_timeout,
            backoff,
            delivery,
            simulated_work,
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(self.name.clone())
            .with_dequeue_timeout(self.dequeue_timeout)
            .with_backoff(self.backoff.clone())
            .with_delivery(self.delivery)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            backoff: Backoff::default(),
            delivery: DeliveryMode::AtMostOnce,
            simulated_work: DEFAULT_SIMULATED_WORK,
        }
    }
}

fn default_worker_name() -> String {
    format!("worker-{}", std::process::id())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Producer HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: read(lookup, "HOST").unwrap_or_else(|| DEFAULT_HOST.into()),
            port: parse_or(lookup, "PORT", DEFAULT_PORT)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}
