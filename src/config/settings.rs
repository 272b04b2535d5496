//! Configuration settings structures for fusion-coord
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "fusion-coord".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_path() -> String {
    "logs/coord.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_pool_size() -> u32 {
    4
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_command_timeout_ms() -> u64 {
    1_000
}

fn default_reconnect_cooldown_ms() -> u64 {
    5_000
}

fn default_key_prefix() -> String {
    "fusion".to_string()
}

fn default_resubscribe_delay_ms() -> u64 {
    1_000
}

fn default_resubscribe_jitter_ms() -> u64 {
    500
}

fn default_circuit_namespace() -> u8 {
    0
}

fn default_circuit_family() -> String {
    "default".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_state_ttl_seconds() -> u64 {
    3_600
}

fn default_cache_namespace() -> u8 {
    1
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    600
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used as the owner tag for connections
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

// ============================================================================
// Logger Settings
// ============================================================================

/// Console output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            colored: true,
        }
    }
}

/// File output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: true,
            format: default_log_format(),
        }
    }
}

/// Logger configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level or filter directive, e.g. "info" or "fusion_coord=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime `LoggerConfig`.
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let format = self
            .file
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", &e.to_string()))?;

        let config = LoggerConfig {
            console: ConsoleConfig {
                enabled: self.console.enabled,
                colored: self.console.colored,
            },
            file: FileConfig {
                enabled: self.file.enabled,
                path: PathBuf::from(self.file.path),
                append: self.file.append,
                format,
            },
            level: self.level,
        };

        config
            .validate()
            .map_err(|e| ConfigError::validation("logger", &e.to_string()))?;
        Ok(config)
    }
}

// ============================================================================
// Backing Store Configuration
// ============================================================================

/// Redis connection settings shared by every namespace.
///
/// Leaving `host` unset puts the whole layer in fallback mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Master switch; `false` behaves exactly like a missing host
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_store_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Use `rediss://`
    #[serde(default)]
    pub tls_enabled: bool,

    /// Maximum pooled connections per namespace
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Bound on a single connect attempt (pool build, PING, subscriber)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on every command issued through a handle
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// After a failed connect, skip further attempts for this long
    #[serde(default = "default_reconnect_cooldown_ms")]
    pub reconnect_cooldown_ms: u64,

    /// Prefix for every key and channel this layer touches
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            port: default_store_port(),
            username: None,
            password: None,
            tls_enabled: false,
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            reconnect_cooldown_ms: default_reconnect_cooldown_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl StoreConfig {
    /// Whether a backing store should be contacted at all.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// Connection URL for one logical database.
    pub fn url_for(&self, namespace: u8) -> Option<String> {
        if !self.is_configured() {
            return None;
        }
        let host = self.host.as_deref()?.trim();
        let scheme = if self.tls_enabled { "rediss" } else { "redis" };
        let mut url =
            url::Url::parse(&format!("{}://{}:{}/{}", scheme, host, self.port, namespace)).ok()?;

        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username).ok()?;
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password)).ok()?;
        }
        Some(url.to_string())
    }

    /// Address for log lines, never includes credentials.
    pub fn display_address(&self) -> String {
        match self.host.as_deref() {
            Some(host) => format!("{}:{}", host, self.port),
            None => "<unset>".to_string(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }
}

// ============================================================================
// Sync Listener Configuration
// ============================================================================

/// Behaviour of the background pub/sub listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay before re-subscribing after the subscriber connection is lost
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,

    /// Random extra delay so instances do not reconnect in lockstep
    #[serde(default = "default_resubscribe_jitter_ms")]
    pub resubscribe_jitter_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
            resubscribe_jitter_ms: default_resubscribe_jitter_ms(),
        }
    }
}

// ============================================================================
// Circuit Breaker Configuration
// ============================================================================

/// Per-dependency overrides; unset fields inherit the section defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CircuitOverride {
    #[serde(default)]
    pub failure_threshold: Option<u32>,

    #[serde(default)]
    pub reset_timeout_ms: Option<u64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Resolved policy for one protected dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub call_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Logical database holding circuit state
    #[serde(default = "default_circuit_namespace")]
    pub namespace: u8,

    /// Breaker family; one sync channel per family
    #[serde(default = "default_circuit_family")]
    pub family: String,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Timeout callers should apply to the protected outbound call
    #[serde(default = "default_call_timeout_ms")]
    pub timeout_ms: u64,

    /// Expiry of the replicated state key
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: u64,

    /// Circuits to report on from the start, before first use
    #[serde(default)]
    pub circuits: Vec<String>,

    #[serde(default)]
    pub overrides: HashMap<String, CircuitOverride>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            namespace: default_circuit_namespace(),
            family: default_circuit_family(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            timeout_ms: default_call_timeout_ms(),
            state_ttl_seconds: default_state_ttl_seconds(),
            circuits: Vec::new(),
            overrides: HashMap::new(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn policy_for(&self, name: &str) -> CircuitPolicy {
        let o = self.overrides.get(name).cloned().unwrap_or_default();
        CircuitPolicy {
            failure_threshold: o.failure_threshold.unwrap_or(self.failure_threshold).max(1),
            reset_timeout: Duration::from_millis(o.reset_timeout_ms.unwrap_or(self.reset_timeout_ms)),
            call_timeout: Duration::from_millis(o.timeout_ms.unwrap_or(self.timeout_ms)),
        }
    }
}

// ============================================================================
// Cache Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheKindConfig {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,

    #[serde(default)]
    pub sweep_interval_seconds: Option<u64>,
}

/// Resolved policy for one cache kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Logical database holding cache entries
    #[serde(default = "default_cache_namespace")]
    pub namespace: u8,

    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Per-kind overrides; listed kinds are also created at startup
    #[serde(default)]
    pub kinds: HashMap<String, CacheKindConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_cache_namespace(),
            ttl_seconds: default_cache_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            kinds: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn policy_for(&self, kind: &str) -> CachePolicy {
        let k = self.kinds.get(kind).cloned().unwrap_or_default();
        CachePolicy {
            ttl: Duration::from_secs(k.ttl_seconds.unwrap_or(self.ttl_seconds)),
            sweep_interval: Duration::from_secs(
                k.sweep_interval_seconds.unwrap_or(self.sweep_interval_seconds),
            ),
        }
    }
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete settings for the coordination layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub logger: LoggerSettings,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}
