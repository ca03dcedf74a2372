// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and severity levels.
//!
//! A [`LogEntry`] is created once per accepted log call and never mutated
//! afterwards. It is owned by the [`EntryBuffer`](crate::buffer::EntryBuffer)
//! until a flush hands a copy of it to the dispatcher.

use derive_more::Display;
use serde::Serialize;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[display("TRACE")]
    Trace = 1,
    #[display("DEBUG")]
    Debug = 2,
    #[display("INFO")]
    Info = 3,
    #[display("WARN")]
    Warn = 4,
    #[display("ERROR")]
    Error = 5,
    #[display("FATAL")]
    Fatal = 6,
}

/// Minimum level a logger accepts. `All` lets everything through and `Off`
/// rejects everything.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LevelFilter {
    #[display("all")]
    All = 0,
    #[display("trace")]
    Trace = 1,
    #[display("debug")]
    Debug = 2,
    #[default]
    #[display("info")]
    Info = 3,
    #[display("warn")]
    Warn = 4,
    #[display("error")]
    Error = 5,
    #[display("fatal")]
    Fatal = 6,
    #[display("off")]
    Off = 7,
}

impl LevelFilter {
    #[must_use]
    pub fn enables(self, level: Level) -> bool {
        level as u8 >= self as u8
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl FromStr for LevelFilter {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(LevelFilter::All),
            "off" => Ok(LevelFilter::Off),
            other => other.parse::<Level>().map(LevelFilter::from),
        }
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace => LevelFilter::Trace,
            Level::Debug => LevelFilter::Debug,
            Level::Info => LevelFilter::Info,
            Level::Warn => LevelFilter::Warn,
            Level::Error => LevelFilter::Error,
            Level::Fatal => LevelFilter::Fatal,
        }
    }
}

/// A single structured log record.
///
/// Serialized in camelCase with absent optional fields omitted, which is the
/// shape the ingestion endpoint expects inside the `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    level: Level,
    message: String,
    logger_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    short_name: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_name: Option<String>,
    details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

impl LogEntry {
    pub fn new(level: Level, message: impl Into<String>, logger_name: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            logger_name: logger_name.into(),
            short_name: None,
            timestamp: None,
            host_name: None,
            details: String::new(),
            category: None,
        }
    }

    #[must_use]
    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, millis: u64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Stamps the entry with the current wall-clock time.
    #[must_use]
    pub fn stamped_now(self) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        self.with_timestamp(millis)
    }

    #[must_use]
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    pub fn short_name(&self) -> Option<&str> {
        self.short_name.as_deref()
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}
