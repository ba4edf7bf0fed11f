//! Executor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BatchError, Result};

/// Configuration for one executor.
///
/// Durations are written as integer milliseconds in serialized form:
///
/// ```json
/// { "name": "proxies", "max_concurrent": 30, "timeout_ms": 3000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Optional label used in logs and copied to the outcome
    pub name: Option<String>,

    /// Maximum number of units of work executing at once
    pub max_concurrent: usize,

    /// Deadline for the whole batch
    #[serde(rename = "timeout_ms", with = "millis::option")]
    pub timeout: Option<Duration>,

    /// How long the thread-pool backend waits for running workers after
    /// cancellation before detaching them
    #[serde(rename = "drain_grace_ms", with = "millis")]
    pub drain_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_concurrent: num_cpus::get(),
            timeout: None,
            drain_grace: Duration::from_millis(50),
        }
    }
}

impl ExecutorConfig {
    /// Parse a configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the batch name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the concurrency limit
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the batch deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the drain grace period for the thread-pool backend
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Reject a zero concurrency limit or a zero deadline
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(BatchError::InvalidArgument(
                "max_concurrent must be positive".to_string(),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(BatchError::InvalidArgument(
                "timeout must be positive if specified".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
