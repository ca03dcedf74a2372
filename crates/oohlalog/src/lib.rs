// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side log shipping for the OohLaLog ingestion API.
//!
//! Log calls go into a bounded in-memory buffer that drops its oldest entry
//! when full. Background loops deliver the buffer in batches, on a size
//! threshold or a timer, with at most one delivery in flight and a cooldown
//! after failures. A separate loop pushes process stats.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

/// Bounded FIFO of pending entries
pub mod buffer;

/// Environment configuration and validation
pub mod config;

/// Delivery seam and request payloads
pub mod dispatcher;

pub mod entry;
pub mod errors;

/// Threshold watcher, flush timer and the flush gate
pub mod flush;

/// reqwest-backed dispatcher
pub mod http;

pub mod logger;
pub mod shipper;
pub mod stats;

pub use buffer::{EntryBuffer, Snapshot};
pub use config::Config;
pub use dispatcher::{BatchPayload, DeliveryMetadata, Dispatcher, StatsPayload};
pub use entry::{Level, LevelFilter, LogEntry};
pub use errors::{ConfigError, DeliveryError};
pub use flush::{FlushController, FlushLimit, FlushOutcome};
pub use http::HttpDispatcher;
pub use logger::Logger;
pub use shipper::Shipper;
pub use stats::{ProcessStatsProvider, StatsController, StatsProvider};
