//! Configuration for the negotiation engine

use crate::error::ConfigError;
use accord_statemachine::{
    ExponentialWaitStrategy, FixedWaitStrategy, NoWaitStrategy, WaitStrategy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity of this participant, used as provider or consumer id
    #[serde(default = "default_participant_id")]
    pub participant_id: String,

    /// Address counterparties send protocol messages to
    #[serde(default = "default_callback_address")]
    pub callback_address: String,

    /// Polling loop configuration
    #[serde(default)]
    pub state_machine: StateMachineConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Lease configuration
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Listener delivery configuration
    #[serde(default)]
    pub observer: ObserverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            participant_id: default_participant_id(),
            callback_address: default_callback_address(),
            state_machine: StateMachineConfig::default(),
            retry: RetryConfig::default(),
            lease: LeaseConfig::default(),
            observer: ObserverConfig::default(),
        }
    }
}

/// Polling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Entities leased per processor per iteration
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep after an iteration that processed nothing
    #[serde(default = "default_iteration_wait_ms")]
    pub iteration_wait_ms: u64,

    /// Entities of one batch handled concurrently
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            iteration_wait_ms: default_iteration_wait_ms(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Delay strategy between dispatch retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    #[default]
    Exponential,
    Fixed,
    None,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per state before giving up
    #[serde(default = "default_retry_limit")]
    pub limit: u32,

    #[serde(default)]
    pub strategy: RetryStrategy,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limit: default_retry_limit(),
            strategy: RetryStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_duration_ms")]
    pub duration_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_lease_duration_ms(),
        }
    }
}

/// Listener delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Buffered events per listener
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_participant_id() -> String {
    "accord-participant".to_string()
}

fn default_callback_address() -> String {
    "http://localhost:8282/protocol".to_string()
}

fn default_batch_size() -> usize {
    20
}

fn default_iteration_wait_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    10
}

fn default_retry_limit() -> u32 {
    7
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_lease_duration_ms() -> u64 {
    60_000
}

fn default_channel_capacity() -> usize {
    1024
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and `ACCORD_`
    /// environment variables, in increasing precedence.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `ACCORD_STATE_MACHINE__BATCH_SIZE=50`.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with ACCORD_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("ACCORD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participant_id.trim().is_empty() {
            return Err(ConfigError::Invalid("participant_id must not be empty".into()));
        }
        if self.state_machine.batch_size == 0 {
            return Err(ConfigError::Invalid("state_machine.batch_size must be positive".into()));
        }
        if self.state_machine.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "state_machine.max_concurrent must be positive".into(),
            ));
        }
        if self.retry.limit == 0 {
            return Err(ConfigError::Invalid("retry.limit must be positive".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.lease.duration_ms == 0 {
            return Err(ConfigError::Invalid("lease.duration_ms must be positive".into()));
        }
        if self.observer.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "observer.channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn iteration_wait(&self) -> Duration {
        Duration::from_millis(self.state_machine.iteration_wait_ms)
    }

    /// Lease duration for store handles serving this engine.
    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lease.duration_ms).unwrap_or(i64::MAX))
    }

    pub fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        let base = Duration::from_millis(self.retry.base_delay_ms);
        match self.retry.strategy {
            RetryStrategy::Exponential => Arc::new(ExponentialWaitStrategy::new(
                base,
                Duration::from_millis(self.retry.max_delay_ms),
            )),
            RetryStrategy::Fixed => Arc::new(FixedWaitStrategy(base)),
            RetryStrategy::None => Arc::new(NoWaitStrategy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.state_machine.batch_size, 20);
        assert_eq!(config.state_machine.iteration_wait_ms, 1000);
        assert_eq!(config.retry.limit, 7);
        assert_eq!(config.retry.strategy, RetryStrategy::Exponential);
        assert_eq!(config.lease.duration_ms, 60_000);
        assert_eq!(config.observer.channel_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
participant_id = "provider-1"

[state_machine]
batch_size = 5

[retry]
limit = 3
strategy = "fixed"
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.participant_id, "provider-1");
        assert_eq!(config.state_machine.batch_size, 5);
        assert_eq!(config.state_machine.max_concurrent, 10);
        assert_eq!(config.retry.limit, 3);
        assert_eq!(config.retry.strategy, RetryStrategy::Fixed);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("ACCORD_LEASE__DURATION_MS", "1500");
        let config = EngineConfig::load(None).unwrap();
        std::env::remove_var("ACCORD_LEASE__DURATION_MS");
        assert_eq!(config.lease.duration_ms, 1500);
        assert_eq!(config.lease_duration(), chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = EngineConfig::default();
        config.state_machine.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.retry.limit = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.observer.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wait_strategy_from_config() {
        let mut config = EngineConfig::default();
        config.retry.strategy = RetryStrategy::None;
        assert_eq!(config.wait_strategy().retry_delay(3), Duration::ZERO);

        config.retry.strategy = RetryStrategy::Exponential;
        assert_eq!(config.wait_strategy().retry_delay(2), Duration::from_millis(2000));
    }
}
