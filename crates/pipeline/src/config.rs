//! Pool configuration
//!
//! Both pools are configured once at construction; nothing here can be
//! changed while a pool is running.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or missing
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed
    #[error("failed to parse {name}: {value:?}")]
    Parse { name: String, value: String },
}

/// Deletion pool configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use shortener_pipeline::DeletePoolConfig;
///
/// let config = DeletePoolConfig::default()
///     .with_max_workers(4)
///     .with_batch_size(50)
///     .with_batch_flush_period(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletePoolConfig {
    /// Name used in log fields
    pub pool_name: String,

    /// Upper bound on concurrently running expansion workers
    pub max_workers: u32,

    /// Capacity of the incoming deletion request queue
    pub request_queue_capacity: usize,

    /// Capacity of the per-record task queue feeding the batcher
    pub task_queue_capacity: usize,

    /// Maximum number of tasks in one batch
    pub batch_size: usize,

    /// Period of the time-based flush
    #[serde(with = "duration_millis")]
    pub batch_flush_period: Duration,

    /// How often the scaler inspects the backlog
    #[serde(with = "duration_millis")]
    pub scaler_check_period: Duration,

    /// Bound on a single sink call
    #[serde(with = "duration_millis")]
    pub sink_timeout: Duration,

    /// Bound on the whole drain after cancellation; work still buffered
    /// when it passes is logged and dropped
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for DeletePoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "delete".to_string(),
            max_workers: 3,
            request_queue_capacity: 100,
            task_queue_capacity: 1000,
            batch_size: 10,
            batch_flush_period: Duration::from_millis(500),
            scaler_check_period: Duration::from_secs(5),
            sink_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl DeletePoolConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - `DELETE_POOL_MAX_WORKERS`
    /// - `DELETE_POOL_REQUEST_QUEUE`
    /// - `DELETE_POOL_TASK_QUEUE`
    /// - `DELETE_POOL_BATCH_SIZE`
    /// - `DELETE_POOL_FLUSH_PERIOD_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_workers: env_or("DELETE_POOL_MAX_WORKERS", defaults.max_workers),
            request_queue_capacity: env_or(
                "DELETE_POOL_REQUEST_QUEUE",
                defaults.request_queue_capacity,
            ),
            task_queue_capacity: env_or("DELETE_POOL_TASK_QUEUE", defaults.task_queue_capacity),
            batch_size: env_or("DELETE_POOL_BATCH_SIZE", defaults.batch_size),
            batch_flush_period: Duration::from_millis(env_or(
                "DELETE_POOL_FLUSH_PERIOD_MS",
                defaults.batch_flush_period.as_millis() as u64,
            )),
            ..defaults
        }
    }

    /// Set the pool name used in logs
    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    /// Set maximum workers
    pub fn with_max_workers(mut self, max: u32) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set request queue capacity
    pub fn with_request_queue_capacity(mut self, capacity: usize) -> Self {
        self.request_queue_capacity = capacity.max(1);
        self
    }

    /// Set task queue capacity
    pub fn with_task_queue_capacity(mut self, capacity: usize) -> Self {
        self.task_queue_capacity = capacity.max(1);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the time-based flush period
    pub fn with_batch_flush_period(mut self, period: Duration) -> Self {
        self.batch_flush_period = period;
        self
    }

    /// Set the scaler check period
    pub fn with_scaler_check_period(mut self, period: Duration) -> Self {
        self.scaler_check_period = period;
        self
    }

    /// Set the sink call timeout
    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Set the shutdown drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.request_queue_capacity == 0 || self.task_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        check_period("batch_flush_period", self.batch_flush_period)?;
        check_period("scaler_check_period", self.scaler_check_period)?;
        check_period("sink_timeout", self.sink_timeout)?;
        check_period("shutdown_timeout", self.shutdown_timeout)?;
        Ok(())
    }
}

/// Audit pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditPoolConfig {
    /// Name used in log fields
    pub pool_name: String,

    /// Upper bound on concurrently running workers
    pub max_workers: u32,

    /// Capacity of the event queue
    pub event_queue_capacity: usize,

    /// How often the scaler inspects the backlog
    #[serde(with = "duration_millis")]
    pub scaler_check_period: Duration,

    /// Bound on a single sink call
    #[serde(with = "duration_millis")]
    pub sink_timeout: Duration,

    /// Bound on delivering queued events after cancellation
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for AuditPoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "audit".to_string(),
            max_workers: 5,
            event_queue_capacity: 1000,
            scaler_check_period: Duration::from_secs(5),
            sink_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl AuditPoolConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - `AUDIT_POOL_MAX_WORKERS`
    /// - `AUDIT_POOL_EVENT_QUEUE`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_workers: env_or("AUDIT_POOL_MAX_WORKERS", defaults.max_workers),
            event_queue_capacity: env_or("AUDIT_POOL_EVENT_QUEUE", defaults.event_queue_capacity),
            ..defaults
        }
    }

    /// Set the pool name used in logs
    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    /// Set maximum workers
    pub fn with_max_workers(mut self, max: u32) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set event queue capacity
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    /// Set the scaler check period
    pub fn with_scaler_check_period(mut self, period: Duration) -> Self {
        self.scaler_check_period = period;
        self
    }

    /// Set the sink call timeout
    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Set the shutdown drain bound
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be at least 1".into(),
            ));
        }
        check_period("scaler_check_period", self.scaler_check_period)?;
        check_period("sink_timeout", self.sink_timeout)?;
        check_period("shutdown_timeout", self.shutdown_timeout)?;
        Ok(())
    }
}

fn check_period(name: &str, period: Duration) -> Result<(), ConfigError> {
    if period.is_zero() {
        return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
    }
    Ok(())
}

/// Read and parse an environment variable, using `default` when it is unset
/// or unparsable.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read and parse an optional environment variable
pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value.parse().map(Some).map_err(|_| ConfigError::Parse {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(None),
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
