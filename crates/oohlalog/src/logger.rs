// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named loggers that turn application log calls into buffered [`LogEntry`]s.

use std::error::Error;
use std::sync::Arc;

use crate::buffer::EntryBuffer;
use crate::config::Config;
use crate::entry::{Level, LevelFilter, LogEntry};

/// A cheap, cloneable handle writing into a shared [`EntryBuffer`].
///
/// Logging never blocks on delivery and never fails: entries below the
/// logger's level are dropped, everything else goes into the buffer.
#[derive(Debug, Clone)]
pub struct Logger {
    name: Arc<str>,
    short_name: Arc<str>,
    filter: LevelFilter,
    show_timestamp: bool,
    show_log_name: bool,
    show_short_name: bool,
    host_name: Option<Arc<str>>,
    buffer: Arc<EntryBuffer>,
}

impl Logger {
    #[must_use]
    pub fn new(name: &str, config: &Config, buffer: Arc<EntryBuffer>) -> Self {
        Logger {
            name: Arc::from(name),
            short_name: Arc::from(short_name(name)),
            filter: config.level_for(name),
            show_timestamp: config.show_timestamp,
            show_log_name: config.show_log_name,
            show_short_name: config.show_short_name,
            host_name: config.host_name.as_deref().map(Arc::from),
            buffer,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        self.filter
    }

    #[must_use]
    pub fn is_enabled(&self, level: Level) -> bool {
        self.filter.enables(level)
    }

    pub fn log(&self, level: Level, message: impl Into<String>, cause: Option<&dyn Error>) {
        if !self.is_enabled(level) {
            return;
        }

        let mut entry =
            LogEntry::new(level, message, &*self.name).with_details(self.details(cause));
        if self.show_short_name {
            entry = entry.with_short_name(&*self.short_name);
        }
        if self.show_timestamp {
            entry = entry.stamped_now();
        }
        if let Some(host_name) = &self.host_name {
            entry = entry.with_host_name(&**host_name);
        }
        self.buffer.add(entry);
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(Level::Trace, message, None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message, None);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(Level::Fatal, message, None);
    }

    /// `"Logger: {name} {short} {cause}"`, each part only when enabled.
    fn details(&self, cause: Option<&dyn Error>) -> String {
        let mut details = String::new();
        if self.show_log_name || self.show_short_name {
            details.push_str("Logger: ");
        }
        if self.show_log_name {
            details.push_str(&self.name);
            details.push(' ');
        }
        if self.show_short_name {
            details.push_str(&self.short_name);
            details.push(' ');
        }
        if let Some(cause) = cause {
            details.push_str(&cause.to_string());
        }
        details
    }
}

/// Last component of a logger name, split on `.` and then on `/`.
#[must_use]
pub fn short_name(name: &str) -> &str {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.rsplit('/').next().unwrap_or(last)
}
