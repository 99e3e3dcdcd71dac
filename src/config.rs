//! Consumer server configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Timing and sizing knobs for the worker manager and its workers
///
/// Built once at startup and passed to the manager; workers receive a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Wait between retries when the store fails (milliseconds)
    pub retry_interval_ms: u64,

    /// Grace period between stopping fetches and stopping ack dispatch on shutdown (milliseconds)
    pub wait_ack_on_close_ms: u64,

    /// Interval between idle worker checks (milliseconds)
    pub idle_check_interval_ms: u64,

    /// Interval between watermark flush passes (milliseconds)
    pub ack_flush_interval_ms: u64,

    /// Interval between heartbeats (milliseconds)
    pub heartbeat_interval_ms: u64,

    /// Address reported to the coordination point on each heartbeat
    pub heartbeat_target: String,

    /// True when this server runs as the replica
    pub is_replica: bool,

    /// Maximum messages fetched from the store per query
    pub fetch_batch_size: i64,

    /// Wait before fetching again when a topic had nothing new (milliseconds)
    pub fetch_poll_interval_ms: u64,

    /// Upper bound on unacked deliveries per connection
    pub max_channel_parallelism: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
            wait_ack_on_close_ms: 5000,
            idle_check_interval_ms: 10_000,
            ack_flush_interval_ms: 1000,
            heartbeat_interval_ms: 2000,
            heartbeat_target: "127.0.0.1".to_string(),
            is_replica: false,
            fetch_batch_size: 50,
            fetch_poll_interval_ms: 200,
            max_channel_parallelism: 100,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from `CONSUMER_*` environment variables
    ///
    /// Unset variables keep their default; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        env_override("CONSUMER_RETRY_INTERVAL_MS", &mut config.retry_interval_ms)?;
        env_override("CONSUMER_WAIT_ACK_ON_CLOSE_MS", &mut config.wait_ack_on_close_ms)?;
        env_override("CONSUMER_IDLE_CHECK_INTERVAL_MS", &mut config.idle_check_interval_ms)?;
        env_override("CONSUMER_ACK_FLUSH_INTERVAL_MS", &mut config.ack_flush_interval_ms)?;
        env_override("CONSUMER_HEARTBEAT_INTERVAL_MS", &mut config.heartbeat_interval_ms)?;
        env_override("CONSUMER_HEARTBEAT_TARGET", &mut config.heartbeat_target)?;
        env_override("CONSUMER_IS_REPLICA", &mut config.is_replica)?;
        env_override("CONSUMER_FETCH_BATCH_SIZE", &mut config.fetch_batch_size)?;
        env_override("CONSUMER_FETCH_POLL_INTERVAL_MS", &mut config.fetch_poll_interval_ms)?;
        env_override("CONSUMER_MAX_CHANNEL_PARALLELISM", &mut config.max_channel_parallelism)?;

        Ok(config)
    }

    /// Set the store retry interval in milliseconds (builder pattern)
    pub fn with_retry_interval_ms(mut self, ms: u64) -> Self {
        self.retry_interval_ms = ms;
        self
    }

    /// Set the shutdown grace period in milliseconds (builder pattern)
    pub fn with_wait_ack_on_close_ms(mut self, ms: u64) -> Self {
        self.wait_ack_on_close_ms = ms;
        self
    }

    /// Set the idle check interval in milliseconds (builder pattern)
    pub fn with_idle_check_interval_ms(mut self, ms: u64) -> Self {
        self.idle_check_interval_ms = ms;
        self
    }

    /// Set the watermark flush interval in milliseconds (builder pattern)
    pub fn with_ack_flush_interval_ms(mut self, ms: u64) -> Self {
        self.ack_flush_interval_ms = ms;
        self
    }

    /// Set the heartbeat interval in milliseconds (builder pattern)
    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Set the heartbeat target address (builder pattern)
    pub fn with_heartbeat_target(mut self, target: impl Into<String>) -> Self {
        self.heartbeat_target = target.into();
        self
    }

    /// Set the replica role flag (builder pattern)
    pub fn with_replica(mut self, is_replica: bool) -> Self {
        self.is_replica = is_replica;
        self
    }

    /// Set the fetch batch size (builder pattern)
    pub fn with_fetch_batch_size(mut self, batch_size: i64) -> Self {
        self.fetch_batch_size = batch_size;
        self
    }

    /// Set the idle fetch poll interval in milliseconds (builder pattern)
    pub fn with_fetch_poll_interval_ms(mut self, ms: u64) -> Self {
        self.fetch_poll_interval_ms = ms;
        self
    }

    /// Set the per-connection parallelism cap (builder pattern)
    pub fn with_max_channel_parallelism(mut self, max: usize) -> Self {
        self.max_channel_parallelism = max;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn wait_ack_on_close(&self) -> Duration {
        Duration::from_millis(self.wait_ack_on_close_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }

    pub fn ack_flush_interval(&self) -> Duration {
        Duration::from_millis(self.ack_flush_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn fetch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_poll_interval_ms)
    }
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) -> Result<()> {
    match std::env::var(key) {
        Ok(raw) => {
            *slot = raw
                .trim()
                .parse()
                .map_err(|_| Error::ValidationError(format!("Invalid value for {}: {}", key, raw)))?;
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.retry_interval(), Duration::from_secs(1));
        assert_eq!(config.idle_check_interval(), Duration::from_secs(10));
        assert!(!config.is_replica);
        assert_eq!(config.fetch_batch_size, 50);
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::default()
            .with_retry_interval_ms(10)
            .with_wait_ack_on_close_ms(20)
            .with_idle_check_interval_ms(30)
            .with_ack_flush_interval_ms(40)
            .with_heartbeat_interval_ms(50)
            .with_heartbeat_target("10.0.0.1")
            .with_replica(true)
            .with_fetch_batch_size(5)
            .with_fetch_poll_interval_ms(60)
            .with_max_channel_parallelism(3);

        assert_eq!(config.retry_interval(), Duration::from_millis(10));
        assert_eq!(config.wait_ack_on_close(), Duration::from_millis(20));
        assert_eq!(config.idle_check_interval(), Duration::from_millis(30));
        assert_eq!(config.ack_flush_interval(), Duration::from_millis(40));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(50));
        assert_eq!(config.heartbeat_target, "10.0.0.1");
        assert!(config.is_replica);
        assert_eq!(config.fetch_batch_size, 5);
        assert_eq!(config.fetch_poll_interval(), Duration::from_millis(60));
        assert_eq!(config.max_channel_parallelism, 3);
    }

    #[test]
    fn test_config_deserialization_fills_defaults() {
        let json = r#"{"ack_flush_interval_ms":250,"is_replica":true}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ack_flush_interval_ms, 250);
        assert!(config.is_replica);
        assert_eq!(config.retry_interval_ms, 1000);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        std::env::set_var("CONSUMER_TEST_ONLY_VALUE", "not-a-number");
        let mut slot = 5u64;
        assert!(env_override("CONSUMER_TEST_ONLY_VALUE", &mut slot).is_err());
        assert_eq!(slot, 5);

        std::env::set_var("CONSUMER_TEST_ONLY_VALUE", " 42 ");
        env_override("CONSUMER_TEST_ONLY_VALUE", &mut slot).unwrap();
        assert_eq!(slot, 42);
        std::env::remove_var("CONSUMER_TEST_ONLY_VALUE");
    }
}
