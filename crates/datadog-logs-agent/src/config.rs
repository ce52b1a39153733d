// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default ingestion endpoint logs are shipped to.
pub const DEFAULT_RECEIVER_URL: &str = "https://http-intake.logs.datadoghq.com";

/// Maximum number of records buffered while the device is offline.
pub const DEFAULT_MAX_OFFLINE_MESSAGES: usize = 5000;

/// Minimum number of queued records before a batch-triggered flush may fire.
pub const DEFAULT_MIN_BATCH_SIZE: usize = 10;

/// Minimum spacing between two batch-triggered flushes.
pub const DEFAULT_MIN_TIME_DELAY: Duration = Duration::from_millis(60 * 1000);

/// Cadence of the periodic fallback flush.
pub const DEFAULT_TIME_INTERVAL: Duration = Duration::from_millis(15 * 60 * 1000);

/// Configuration for the logs agent.
///
/// `app_token`, `stream_type` and `storage_dir` are required; everything else
/// has a default. Missing required fields are a fatal construction error —
/// the agent must not silently run half-configured.
#[derive(Debug, Clone)]
pub struct LogsConfig {
    /// Upload destination for log batches
    pub receiver_url: String,
    /// Auth credential attached to every upload
    pub app_token: String,
    /// Log-stream classification tag
    pub stream_type: String,
    /// Agent-scoped directory holding the durable queue and install id
    pub storage_dir: PathBuf,
    /// Queue capacity bound
    pub max_offline_messages: usize,
    /// Minimum queued records before a constrained flush may trigger
    pub min_batch_size: usize,
    /// Minimum spacing between two batch-triggered flushes
    pub min_time_delay: Duration,
    /// Periodic fallback flush cadence
    pub time_interval: Duration,
    /// Only upload on an unmetered network
    pub requires_unmetered_network: bool,
    /// Only upload while the device is idle
    pub requires_device_idle: bool,
    /// Only upload while the battery is not low
    pub requires_battery_not_low: bool,
}

impl LogsConfig {
    /// Creates a configuration with the required fields and defaults for the rest.
    pub fn new(
        app_token: impl Into<String>,
        stream_type: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            receiver_url: DEFAULT_RECEIVER_URL.to_string(),
            app_token: app_token.into(),
            stream_type: stream_type.into(),
            storage_dir: storage_dir.into(),
            max_offline_messages: DEFAULT_MAX_OFFLINE_MESSAGES,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            min_time_delay: DEFAULT_MIN_TIME_DELAY,
            time_interval: DEFAULT_TIME_INTERVAL,
            requires_unmetered_network: false,
            requires_device_idle: false,
            requires_battery_not_low: false,
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_token = env::var("DD_LOGS_APP_TOKEN").unwrap_or_default();
        let stream_type = env::var("DD_LOGS_STREAM_TYPE").unwrap_or_default();
        let storage_dir = env::var("DD_LOGS_STORAGE_DIR").unwrap_or_default();

        let mut config = Self::new(app_token, stream_type, storage_dir);

        if let Ok(url) = env::var("DD_LOGS_RECEIVER_URL") {
            config.receiver_url = url;
        }
        config.max_offline_messages = env_usize(
            "DD_LOGS_MAX_OFFLINE_MESSAGES",
            DEFAULT_MAX_OFFLINE_MESSAGES,
        );
        config.min_batch_size = env_usize("DD_LOGS_MIN_BATCH_SIZE", DEFAULT_MIN_BATCH_SIZE);
        config.min_time_delay = env_millis("DD_LOGS_MIN_TIME_DELAY_MS", DEFAULT_MIN_TIME_DELAY);
        config.time_interval = env_millis("DD_LOGS_TIME_INTERVAL_MS", DEFAULT_TIME_INTERVAL);
        config.requires_unmetered_network = env_bool("DD_LOGS_REQUIRES_UNMETERED_NETWORK");
        config.requires_device_idle = env_bool("DD_LOGS_REQUIRES_DEVICE_IDLE");
        config.requires_battery_not_low = env_bool("DD_LOGS_REQUIRES_BATTERY_NOT_LOW");

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_token.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "app token is required".to_string(),
            ));
        }
        if self.stream_type.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "stream type is required".to_string(),
            ));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage directory is required".to_string(),
            ));
        }
        if self.receiver_url.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "receiver URL cannot be empty".to_string(),
            ));
        }
        if self.max_offline_messages == 0 {
            return Err(ConfigError::InvalidConfig(
                "max offline messages must be greater than 0".to_string(),
            ));
        }
        if self.min_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "min batch size must be greater than 0".to_string(),
            ));
        }
        if self.time_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "time interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Logs the effective configuration once at agent construction.
    pub(crate) fn log_summary(&self) {
        debug!(
            "Logs agent is configured: stream type: {}, receiver URL: {}, \
             max offline messages: {}, min batch size: {}, min time delay: {:?}, \
             time interval: {:?}, unmetered network only: {}, device idle only: {}, \
             battery not low only: {}",
            self.stream_type,
            self.receiver_url,
            self.max_offline_messages,
            self.min_batch_size,
            self.min_time_delay,
            self.time_interval,
            self.requires_unmetered_network,
            self.requires_device_idle,
            self.requires_battery_not_low,
        );
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    env::var(key)
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_is_valid() {
        let config = LogsConfig::new("token", "example", "/tmp/logs-agent");
        assert!(config.validate().is_ok());
        assert_eq!(config.receiver_url, DEFAULT_RECEIVER_URL);
        assert_eq!(config.max_offline_messages, DEFAULT_MAX_OFFLINE_MESSAGES);
        assert_eq!(config.min_batch_size, DEFAULT_MIN_BATCH_SIZE);
        assert_eq!(config.min_time_delay, Duration::from_millis(60_000));
        assert_eq!(config.time_interval, Duration::from_millis(900_000));
        assert!(!config.requires_unmetered_network);
        assert!(!config.requires_device_idle);
        assert!(!config.requires_battery_not_low);
    }

    #[test]
    fn test_validate_missing_app_token() {
        let config = LogsConfig::new("", "example", "/tmp/logs-agent");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_stream_type() {
        let config = LogsConfig::new("token", "   ", "/tmp/logs-agent");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_storage_dir() {
        let config = LogsConfig::new("token", "example", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = LogsConfig::new("token", "example", "/tmp/logs-agent");
        config.max_offline_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = LogsConfig::new("token", "example", "/tmp/logs-agent");
        config.time_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
