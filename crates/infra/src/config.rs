//! Configuration loading and representation.
//!
//! Everything has a working default; `ORDERFLOW_*` environment variables
//! override individual values.

use std::time::Duration;

use thiserror::Error;

use crate::jobs::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Largest work queue the pipeline will allocate. The bounded channel behind
/// the queue cannot hold more than this.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Fulfillment pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Number of concurrent order workers
    pub workers: usize,
    /// Work queue capacity (backpressure bound)
    pub queue_capacity: usize,
    /// How long `submit` waits for queue space
    pub submit_timeout: Duration,
    /// How long a worker waits on an empty queue before re-checking the run state
    pub poll_timeout: Duration,
    /// Pause between rediscovery scans for stuck `Pending` orders
    pub rediscovery_interval: Duration,
    /// How long `stop` waits for in-flight work before aborting it
    pub shutdown_grace: Duration,
    /// Simulated validation/payment stage
    pub validation_delay: Duration,
    /// Simulated fulfillment stage
    pub fulfillment_delay: Duration,
    /// Retry policy for store calls made by workers
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 100,
            submit_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
            rediscovery_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
            validation_delay: Duration::from_secs(2),
            fulfillment_delay: Duration::from_secs(3),
            retry: RetryPolicy::no_retry(),
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_rediscovery_interval(mut self, interval: Duration) -> Self {
        self.rediscovery_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_stage_delays(mut self, validation: Duration, fulfillment: Duration) -> Self {
        self.validation_delay = validation;
        self.fulfillment_delay = fulfillment;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Defaults overridden by `ORDERFLOW_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse::<usize>(&lookup, "ORDERFLOW_WORKERS")? {
            config.workers = v;
        }
        if let Some(v) = parse::<usize>(&lookup, "ORDERFLOW_QUEUE_CAPACITY")? {
            config.queue_capacity = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_SUBMIT_TIMEOUT_MS")? {
            config.submit_timeout = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_POLL_TIMEOUT_MS")? {
            config.poll_timeout = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_REDISCOVERY_INTERVAL_MS")? {
            config.rediscovery_interval = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_VALIDATION_DELAY_MS")? {
            config.validation_delay = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_FULFILLMENT_DELAY_MS")? {
            config.fulfillment_delay = v;
        }
        if let Some(v) = parse::<u32>(&lookup, "ORDERFLOW_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_millis(&lookup, "ORDERFLOW_RETRY_BACKOFF_MS")? {
            config.retry.base_delay = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid(
                "ORDERFLOW_WORKERS",
                "0",
                "at least one worker is required",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "ORDERFLOW_QUEUE_CAPACITY",
                "0",
                "queue capacity must be positive",
            ));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::invalid(
                "ORDERFLOW_QUEUE_CAPACITY",
                self.queue_capacity.to_string(),
                format!("queue capacity must not exceed {MAX_QUEUE_CAPACITY}"),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "ORDERFLOW_POLL_TIMEOUT_MS",
                "0",
                "poll timeout must be positive",
            ));
        }
        if self.rediscovery_interval.is_zero() {
            return Err(ConfigError::invalid(
                "ORDERFLOW_REDISCOVERY_INTERVAL_MS",
                "0",
                "rediscovery interval must be positive",
            ));
        }
        Ok(())
    }
}

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Postgres URL; `None` runs against the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            ..Self::default()
        };
        if let Some(v) = parse::<u32>(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            if v == 0 {
                return Err(ConfigError::invalid(
                    "DATABASE_MAX_CONNECTIONS",
                    "0",
                    "pool needs at least one connection",
                ));
            }
            config.max_connections = v;
        }
        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, raw.clone(), e.to_string())),
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, key)?.map(Duration::from_millis))
}
