use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Events buffered before a size-triggered flush.
pub const BATCH_SIZE: usize = 10;
/// Period of the background flush timer.
pub const FLUSH_INTERVAL_MS: u64 = 5000;

pub const ENV_BATCH_SIZE: &str = "TELEMETRY_BATCH_SIZE";
pub const ENV_FLUSH_INTERVAL_MS: &str = "TELEMETRY_FLUSH_INTERVAL_MS";
pub const ENV_MAX_QUEUE_LEN: &str = "TELEMETRY_MAX_QUEUE_LEN";
pub const ENV_WRITE_TIMEOUT_MS: &str = "TELEMETRY_WRITE_TIMEOUT_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Pipeline tuning.
///
/// `max_queue_len` and `write_timeout` are off by default: a failing store is
/// retried on every trigger and the queue grows without bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub batch_size: usize,
    #[serde(with = "millis")]
    pub flush_interval: Duration,
    #[serde(default)]
    pub max_queue_len: Option<usize>,
    #[serde(default, with = "opt_millis")]
    pub write_timeout: Option<Duration>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            flush_interval: Duration::from_millis(FLUSH_INTERVAL_MS),
            max_queue_len: None,
            write_timeout: None,
        }
    }
}

impl TelemetryConfig {
    /// Defaults overridden by any `TELEMETRY_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = parse_var(&lookup, ENV_BATCH_SIZE)? {
            cfg.batch_size = v as usize;
        }
        if let Some(v) = parse_var(&lookup, ENV_FLUSH_INTERVAL_MS)? {
            cfg.flush_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_QUEUE_LEN)? {
            cfg.max_queue_len = Some(v as usize);
        }
        if let Some(v) = parse_var(&lookup, ENV_WRITE_TIMEOUT_MS)? {
            cfg.write_timeout = Some(Duration::from_millis(v));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Zero("flush_interval"));
        }
        if self.max_queue_len == Some(0) {
            return Err(ConfigError::Zero("max_queue_len"));
        }
        if self.write_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Zero("write_timeout"));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_queue_len(mut self, max: usize) -> Self {
        self.max_queue_len = Some(max);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|o| o.map(Duration::from_millis))
    }
}
