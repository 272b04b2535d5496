//! Configuration validation logic

use crate::config::error::ConfigError;
use crate::config::settings::{
    CacheConfig, CircuitBreakerConfig, LoggerSettings, Settings, StoreConfig, SyncConfig,
};

const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

impl StoreConfig {
    /// # Validation Rules
    /// - Host, when set, must not be blank
    /// - Port, pool size and both timeouts must be non-zero
    /// - Key prefix must not be empty and must not contain glob characters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                return Err(ConfigError::validation(
                    "store.host",
                    "Host must not be blank. Remove it to run in fallback mode.",
                ));
            }
        }

        if self.port == 0 {
            return Err(ConfigError::validation("store.port", "Port must be between 1 and 65535."));
        }

        if self.pool_size == 0 {
            return Err(ConfigError::validation(
                "store.pool_size",
                "Pool size must be greater than 0.",
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "store.connect_timeout_ms",
                "Connect timeout must be greater than 0.",
            ));
        }

        if self.command_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "store.command_timeout_ms",
                "Command timeout must be greater than 0.",
            ));
        }

        if self.key_prefix.is_empty() || self.key_prefix.contains(['*', '?', '[', ']']) {
            return Err(ConfigError::validation(
                "store.key_prefix",
                "Key prefix must be non-empty and free of glob characters.",
            ));
        }

        Ok(())
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resubscribe_delay_ms == 0 {
            return Err(ConfigError::validation(
                "sync.resubscribe_delay_ms",
                "Resubscribe delay must be greater than 0.",
            ));
        }
        Ok(())
    }
}

impl CircuitBreakerConfig {
    /// # Validation Rules
    /// - Family must be non-empty
    /// - Threshold, reset timeout, call timeout and state TTL must be non-zero,
    ///   for the defaults and for every override that sets them
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.family.trim().is_empty() {
            return Err(ConfigError::validation(
                "circuit_breaker.family",
                "Family must not be empty.",
            ));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::validation(
                "circuit_breaker.failure_threshold",
                "Failure threshold must be at least 1.",
            ));
        }

        if self.reset_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "circuit_breaker.reset_timeout_ms",
                "Reset timeout must be greater than 0.",
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::validation(
                "circuit_breaker.timeout_ms",
                "Call timeout must be greater than 0.",
            ));
        }

        if self.state_ttl_seconds == 0 {
            return Err(ConfigError::validation(
                "circuit_breaker.state_ttl_seconds",
                "State TTL must be greater than 0.",
            ));
        }

        for (name, o) in &self.overrides {
            if o.failure_threshold == Some(0)
                || o.reset_timeout_ms == Some(0)
                || o.timeout_ms == Some(0)
            {
                return Err(ConfigError::validation(
                    format!("circuit_breaker.overrides.{}", name),
                    "Override values must be greater than 0.".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds == 0 {
            return Err(ConfigError::validation(
                "cache.ttl_seconds",
                "TTL must be at least 1 second.",
            ));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::validation(
                "cache.sweep_interval_seconds",
                "Sweep interval must be at least 1 second.",
            ));
        }

        for (kind, k) in &self.kinds {
            if !crate::cache::is_valid_kind(kind) {
                return Err(ConfigError::validation(
                    format!("cache.kinds.{}", kind),
                    "Cache kind must be non-empty and free of ':', whitespace and glob characters.".to_string(),
                ));
            }
            if k.ttl_seconds == Some(0) || k.sweep_interval_seconds == Some(0) {
                return Err(ConfigError::validation(
                    format!("cache.kinds.{}", kind),
                    "Override values must be greater than 0.".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl LoggerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::validation("logger.level", "Log level must not be empty."));
        }

        if !VALID_LOG_FORMATS.contains(&self.file.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format".to_string(),
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.file.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        if self.file.enabled && self.file.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file output is enabled.",
            ));
        }

        Ok(())
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logger.validate()?;
        self.store.validate()?;
        self.sync.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}
