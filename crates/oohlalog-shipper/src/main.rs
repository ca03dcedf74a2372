// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use oohlalog::{Config, Level, Shipper};

const LOGGER_NAME_VAR: &str = "OOHLALOG_LOGGER_NAME";
const DEFAULT_LOGGER_NAME: &str = "oohlalog.shipper.stdin";

#[tokio::main]
pub async fn main() {
    let debug_enabled = env::var("OOHLALOG_DEBUG")
        .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false);
    let default_level = if debug_enabled { "debug" } else { "info" };
    let log_level = env::var("OOHLALOG_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| default_level.to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}. Shutting down.");
            return;
        }
    };

    let shipper = match Shipper::start_http(config) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Error starting shipper: {e}. Shutting down.");
            return;
        }
    };

    let logger_name = env::var(LOGGER_NAME_VAR).unwrap_or_else(|_| DEFAULT_LOGGER_NAME.to_string());
    let logger = shipper.logger(&logger_name);
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut shipped: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let (level, message) = split_level(&line);
                    if !message.is_empty() {
                        logger.log(level, message, None);
                        shipped += 1;
                    }
                }
                Ok(None) => {
                    debug!("Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("Failed to read from stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
        }
    }

    let outcome = shipper.shutdown().await;
    info!("Read {shipped} lines, final flush: {outcome:?}");
}

/// Lines may start with a level word, e.g. `WARN disk almost full`.
/// Everything else is shipped at info.
fn split_level(line: &str) -> (Level, &str) {
    let line = line.trim_end();
    if let Some((first, rest)) = line.split_once(char::is_whitespace) {
        let word = first.trim_start_matches('[').trim_end_matches([']', ':']);
        if let Ok(level) = word.parse::<Level>() {
            return (level, rest.trim_start());
        }
    }
    (Level::Info, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_level() {
        assert_eq!(split_level("WARN disk almost full"), (Level::Warn, "disk almost full"));
        assert_eq!(split_level("[error] boom"), (Level::Error, "boom"));
        assert_eq!(split_level("debug:  spaced"), (Level::Debug, "spaced"));
        assert_eq!(split_level("just a line"), (Level::Info, "just a line"));
        assert_eq!(split_level("fatal"), (Level::Info, "fatal"));
        assert_eq!(split_level("  "), (Level::Info, ""));
    }
}
