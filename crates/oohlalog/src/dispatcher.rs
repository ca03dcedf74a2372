// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The delivery seam between the flush pipeline and the network.
//!
//! The flush controller and the stats loop only know about the [`Dispatcher`]
//! trait. [`HttpDispatcher`](crate::http::HttpDispatcher) is the production
//! implementation; tests plug in scripted dispatchers.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use crate::config::Config;
use crate::entry::LogEntry;
use crate::errors::DeliveryError;

/// Endpoint coordinates and credentials, taken from [`Config`] once.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryMetadata {
    pub auth_token: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub stats_path: String,
    pub secure: bool,
    pub agent: String,
}

impl DeliveryMetadata {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            auth_token: config.auth_token.clone().unwrap_or_default(),
            host: config.host.clone(),
            port: config.port,
            path: config.path.clone(),
            stats_path: config.stats_path.clone(),
            secure: config.secure,
            agent: config.agent.clone(),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

impl Debug for DeliveryMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryMetadata")
            .field("auth_token", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("stats_path", &self.stats_path)
            .field("secure", &self.secure)
            .field("agent", &self.agent)
            .finish()
    }
}

/// One delivery attempt's worth of log entries.
///
/// Built right before the attempt from a buffer snapshot and dropped right
/// after it, whatever the outcome.
#[derive(Debug, Clone)]
pub struct BatchPayload {
    pub entries: Vec<LogEntry>,
    pub metadata: DeliveryMetadata,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    messages: &'a [LogEntry],
    agent: &'a str,
}

impl BatchPayload {
    #[must_use]
    pub fn new(entries: Vec<LogEntry>, metadata: DeliveryMetadata) -> Self {
        Self { entries, metadata }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON body: `{"messages": [...], "agent": "..."}`.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&BatchBody {
            messages: &self.entries,
            agent: &self.metadata.agent,
        })
    }
}

/// A metrics snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatsPayload {
    pub metrics: BTreeMap<String, f64>,
    pub host: String,
    #[serde(skip)]
    pub metadata: DeliveryMetadata,
}

impl StatsPayload {
    /// JSON body: `{"metrics": {...}, "host": "..."}`.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends a batch of log entries. `Ok` only when the endpoint confirmed it.
    async fn deliver(&self, batch: &BatchPayload) -> Result<(), DeliveryError>;

    /// Sends a stats snapshot. Failures are reported but never retried.
    async fn deliver_stats(&self, stats: &StatsPayload) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Level;

    fn metadata() -> DeliveryMetadata {
        DeliveryMetadata::from_config(&Config {
            auth_token: Some("secret-token".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_metadata_from_config() {
        let metadata = metadata();
        assert_eq!(metadata.auth_token, "secret-token");
        assert_eq!(metadata.host, "localhost");
        assert_eq!(metadata.port, 8196);
        assert_eq!(metadata.scheme(), "http");
    }

    #[test]
    fn test_metadata_debug_redacts_token() {
        let debug = format!("{:?}", metadata());
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_batch_body_shape() {
        let batch = BatchPayload::new(
            vec![
                LogEntry::new(Level::Info, "first", "app"),
                LogEntry::new(Level::Warn, "second", "app"),
            ],
            metadata(),
        );
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(BatchPayload::new(Vec::new(), metadata()).is_empty());

        let body: serde_json::Value = serde_json::from_slice(&batch.to_json().unwrap()).unwrap();

        assert_eq!(body["agent"], "rust");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["message"], "first");
        assert_eq!(messages[1]["level"], "WARN");
        assert!(body.get("authToken").is_none());
    }

    #[test]
    fn test_stats_body_shape() {
        let stats = StatsPayload {
            metrics: BTreeMap::from([("usedMemory".to_string(), 1024.0)]),
            host: "web-1".to_string(),
            metadata: metadata(),
        };
        let body: serde_json::Value = serde_json::from_slice(&stats.to_json().unwrap()).unwrap();
        assert_eq!(body["metrics"]["usedMemory"], 1024.0);
        assert_eq!(body["host"], "web-1");
        assert!(body.get("metadata").is_none());
    }
}
