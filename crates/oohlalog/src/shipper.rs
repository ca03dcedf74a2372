// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the buffer, flush controller and stats controller together.

use std::sync::Arc;
use tracing::{debug, info};

use crate::buffer::EntryBuffer;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::errors::ConfigError;
use crate::flush::{FlushController, FlushOutcome};
use crate::http::HttpDispatcher;
use crate::logger::Logger;
use crate::stats::{ProcessStatsProvider, StatsController, StatsProvider};

/// A running shipper. Must be created inside a tokio runtime.
pub struct Shipper {
    config: Arc<Config>,
    buffer: Arc<EntryBuffer>,
    flush: FlushController,
    stats: StatsController,
}

impl Shipper {
    /// Validates `config` and starts the flush and stats loops.
    pub fn start(
        mut config: Config,
        dispatcher: Arc<dyn Dispatcher>,
        stats_provider: Arc<dyn StatsProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.host_name.is_none() {
            config.host_name = Some(config.resolved_host_name());
        }

        let buffer = Arc::new(EntryBuffer::new(config.capacity));
        let flush = FlushController::new(&config, Arc::clone(&buffer), Arc::clone(&dispatcher));
        let stats = StatsController::new(&config, dispatcher, stats_provider);
        flush.start();
        stats.start();

        info!(
            "Shipping logs to {}://{}:{}{}",
            if config.secure { "https" } else { "http" },
            config.host,
            config.port,
            config.path
        );
        Ok(Shipper {
            config: Arc::new(config),
            buffer,
            flush,
            stats,
        })
    }

    /// Starts a shipper delivering over HTTP and reporting process stats.
    pub fn start_http(config: Config) -> Result<Self, ConfigError> {
        let dispatcher = Arc::new(HttpDispatcher::new(&config));
        let stats_provider = Arc::new(ProcessStatsProvider::new(&config));
        Self::start(config, dispatcher, stats_provider)
    }

    #[must_use]
    pub fn logger(&self, name: &str) -> Logger {
        Logger::new(name, &self.config, Arc::clone(&self.buffer))
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<EntryBuffer> {
        &self.buffer
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn flush_now(&self) -> FlushOutcome {
        self.flush.flush_now().await
    }

    /// Stops every loop and makes one final attempt to deliver what is left.
    pub async fn shutdown(self) -> FlushOutcome {
        debug!("Shutting down shipper");
        self.stats.shutdown().await;
        let outcome = self.flush.shutdown().await;
        info!(
            "Shipper stopped: {outcome:?}, {} entries evicted",
            self.buffer.evicted()
        );
        outcome
    }
}
