// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration.
//!
//! Configuration is read once at startup into an explicit [`Config`] value,
//! validated, and shared behind an `Arc` by every component. Nothing reads the
//! environment after that.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::entry::LevelFilter;
use crate::errors::ConfigError;

const ENV_PREFIX: &str = "OOHLALOG_";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8196;
pub const DEFAULT_PATH: &str = "/api/logging/save.json";
pub const DEFAULT_STATS_PATH: &str = "/api/timeSeries/save.json";
pub const DEFAULT_AGENT: &str = "rust";
pub const DEFAULT_THRESHOLD: usize = 150;
pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(60_000);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(5000);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct Config {
    /// Project API key, sent as the `apiKey` query parameter
    pub auth_token: Option<String>,
    /// Ingestion endpoint host
    pub host: String,
    pub port: u16,
    /// Path logs are posted to
    pub path: String,
    /// Path stats snapshots are posted to
    pub stats_path: String,
    /// Use https instead of http
    pub secure: bool,
    /// Agent name reported alongside every batch
    pub agent: String,
    /// Host identifier attached to entries and stats; detected when unset
    pub host_name: Option<String>,
    /// Buffer size that triggers an eager flush, and the size of that batch
    pub threshold: usize,
    /// Maximum number of buffered entries before the oldest are overwritten
    pub capacity: usize,
    pub flush_interval: Duration,
    pub stats_interval: Duration,
    /// Pause after a failed delivery before another attempt is allowed
    pub cooldown: Duration,
    /// Per-request timeout for deliveries
    pub timeout: Duration,
    /// Verbose diagnostics about every delivery
    pub debug: bool,
    pub stats_enabled: bool,
    pub memory_stats: bool,
    pub cpu_stats: bool,
    /// Space on the root filesystem
    pub filesystem_stats: bool,
    pub show_timestamp: bool,
    pub show_log_name: bool,
    pub show_short_name: bool,
    pub default_level: LevelFilter,
    /// Per logger-name overrides, matched on dotted prefixes
    pub levels: HashMap<String, LevelFilter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_token: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            stats_path: DEFAULT_STATS_PATH.to_string(),
            secure: false,
            agent: DEFAULT_AGENT.to_string(),
            host_name: None,
            threshold: DEFAULT_THRESHOLD,
            capacity: DEFAULT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            timeout: DEFAULT_TIMEOUT,
            debug: false,
            stats_enabled: true,
            memory_stats: true,
            cpu_stats: true,
            filesystem_stats: true,
            show_timestamp: false,
            show_log_name: false,
            show_short_name: true,
            default_level: LevelFilter::Info,
            levels: HashMap::new(),
        }
    }
}

impl Config {
    /// Create configuration from `OOHLALOG_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup. Keys carry the
    /// `OOHLALOG_` prefix, as they would in the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            auth_token: get("AUTH_TOKEN"),
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(get("PORT"), defaults.port),
            path: get("PATH").unwrap_or(defaults.path),
            stats_path: get("STATS_PATH").unwrap_or(defaults.stats_path),
            secure: parse_bool(get("SECURE"), defaults.secure),
            agent: get("AGENT").unwrap_or(defaults.agent),
            host_name: get("HOST_NAME"),
            threshold: parse_or(get("THRESHOLD"), defaults.threshold),
            capacity: parse_or(get("CAPACITY"), defaults.capacity),
            flush_interval: parse_millis(get("FLUSH_INTERVAL_MS"), defaults.flush_interval),
            stats_interval: parse_millis(get("STATS_INTERVAL_MS"), defaults.stats_interval),
            cooldown: parse_millis(get("COOLDOWN_MS"), defaults.cooldown),
            timeout: parse_millis(get("TIMEOUT_MS"), defaults.timeout),
            debug: parse_bool(get("DEBUG"), defaults.debug),
            stats_enabled: parse_bool(get("STATS"), defaults.stats_enabled),
            memory_stats: parse_bool(get("MEMORY_STATS"), defaults.memory_stats),
            cpu_stats: parse_bool(get("CPU_STATS"), defaults.cpu_stats),
            filesystem_stats: parse_bool(get("FILESYSTEM_STATS"), defaults.filesystem_stats),
            show_timestamp: parse_bool(get("SHOW_TIMESTAMP"), defaults.show_timestamp),
            show_log_name: parse_bool(get("SHOW_LOG_NAME"), defaults.show_log_name),
            show_short_name: parse_bool(get("SHOW_SHORT_NAME"), defaults.show_short_name),
            default_level: parse_or(get("DEFAULT_LEVEL"), defaults.default_level),
            levels: get("LEVELS")
                .map(|v| parse_levels(&v))
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(ConfigError::MissingAuthToken);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "port must be greater than 0".to_string(),
            ));
        }
        for (name, path) in [("path", &self.path), ("stats path", &self.stats_path)] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "{name} must start with '/', got '{path}'"
                )));
            }
        }
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "capacity must be greater than 0".to_string(),
            ));
        }
        if self.threshold == 0 || self.threshold > self.capacity {
            return Err(ConfigError::Invalid(format!(
                "threshold must be between 1 and capacity ({}), got {}",
                self.capacity, self.threshold
            )));
        }
        for (name, duration) in [
            ("flush interval", self.flush_interval),
            ("stats interval", self.stats_interval),
            ("timeout", self.timeout),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Level filter for a logger, taken from the most specific dotted prefix
    /// of `logger_name` present in [`Config::levels`].
    ///
    /// `com.acme.db.Pool` checks `com.acme.db.Pool`, then `com.acme.db`, then
    /// `com.acme`, then `com`, then falls back to [`Config::default_level`].
    #[must_use]
    pub fn level_for(&self, logger_name: &str) -> LevelFilter {
        let mut name = logger_name;
        loop {
            if let Some(level) = self.levels.get(name) {
                return *level;
            }
            match name.rfind('.') {
                Some(i) => name = &name[..i],
                None => return self.default_level,
            }
        }
    }

    /// Configured host name, or the one detected from the system.
    #[must_use]
    pub fn resolved_host_name(&self) -> String {
        self.host_name.clone().unwrap_or_else(detect_hostname)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_millis(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1" | "yes") => true,
        Some("false" | "0" | "no") => false,
        _ => default,
    }
}

/// Parses `name=level` pairs separated by commas or whitespace.
fn parse_levels(value: &str) -> HashMap<String, LevelFilter> {
    let normalized = value.replace(',', " ");
    let mut levels = HashMap::new();
    for pair in normalized.split_whitespace() {
        let Some((name, level)) = pair.split_once('=') else {
            warn!("Ignoring malformed level override '{pair}', expected name=level");
            continue;
        };
        match level.parse::<LevelFilter>() {
            Ok(level) => {
                levels.insert(name.to_string(), level);
            }
            Err(e) => warn!("Ignoring level override for '{name}': {e}"),
        }
    }
    levels
}

/// Hostname from `HOSTNAME`, then the kernel, then `unknown`.
fn detect_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.trim().is_empty() {
            return hostname.trim().to_string();
        }
    }
    if let Ok(hostname) = fs::read_to_string("/proc/sys/kernel/hostname") {
        if !hostname.trim().is_empty() {
            return hostname.trim().to_string();
        }
    }
    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}
