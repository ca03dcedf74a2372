// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery to the OohLaLog ingestion API.
//!
//! Every request is a JSON `POST` to
//! `{http|https}://{host}:{port}{path}?apiKey={token}`. Any 2xx response counts
//! as delivered; transport errors, timeouts and every other status are
//! failures. Retrying is the flush controller's job, not this module's.

use async_trait::async_trait;
use core::time::Duration;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dispatcher::{BatchPayload, DeliveryMetadata, Dispatcher, StatsPayload};
use crate::errors::DeliveryError;

/// Longest response body kept in a [`DeliveryError::Status`].
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    debug: bool,
}

impl HttpDispatcher {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        HttpDispatcher {
            client: get_client(config.timeout),
            debug: config.debug,
        }
    }

    async fn post(&self, url: Url, body: Vec<u8>) -> Result<(), DeliveryError> {
        let redacted = redact(&url);
        if self.debug {
            info!("Submitting {} bytes to {redacted}", body.len());
        } else {
            debug!("Submitting {} bytes to {redacted}", body.len());
        }

        let time = Instant::now();
        let response = self
            .client
            .post(url)
            .headers(json_headers())
            .body(body)
            .send()
            .await?;
        let elapsed = time.elapsed();

        let status = response.status();
        // Don't read the body on success unless someone wants to see it.
        if status.is_success() {
            if self.debug {
                let body = response.text().await.unwrap_or_default();
                info!("Received {status} in {} ms: {body}", elapsed.as_millis());
            } else {
                debug!("Received {status} in {} ms", elapsed.as_millis());
            }
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        error!(
            "Request to {redacted} failed with {status} after {} ms",
            elapsed.as_millis()
        );
        Err(DeliveryError::Status { status, body })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn deliver(&self, batch: &BatchPayload) -> Result<(), DeliveryError> {
        let url = endpoint_url(&batch.metadata, &batch.metadata.path)?;
        let body = batch.to_json()?;
        self.post(url, body).await
    }

    async fn deliver_stats(&self, stats: &StatsPayload) -> Result<(), DeliveryError> {
        let url = endpoint_url(&stats.metadata, &stats.metadata.stats_path)?;
        let body = stats.to_json()?;
        self.post(url, body).await
    }
}

/// Builds the endpoint URL with the token as a percent-encoded `apiKey`
/// query parameter.
pub fn endpoint_url(metadata: &DeliveryMetadata, path: &str) -> Result<Url, DeliveryError> {
    let base = format!(
        "{}://{}:{}",
        metadata.scheme(),
        metadata.host,
        metadata.port
    );
    let mut url = Url::parse(&base).map_err(|e| DeliveryError::Url(format!("{base}: {e}")))?;
    url.set_path(path);
    url.query_pairs_mut()
        .append_pair("apiKey", &metadata.auth_token);
    Ok(url)
}

fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    redacted.set_query(Some("apiKey=<redacted>"));
    redacted.to_string()
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Creates the HTTP client used for every delivery.
///
/// If the configured builder cannot be constructed, falls back to reqwest's
/// defaults so the shipper keeps running.
#[must_use]
pub fn get_client(timeout: Duration) -> reqwest::Client {
    match build_client(timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Level, LogEntry};
    use mockito::{Matcher, Server};
    use std::collections::BTreeMap;

    fn metadata_for(server: &Server) -> DeliveryMetadata {
        let address = server.host_with_port();
        let (host, port) = address.rsplit_once(':').unwrap();
        DeliveryMetadata {
            auth_token: "mock-token".to_string(),
            host: host.to_string(),
            port: port.parse().unwrap(),
            path: "/api/logging/save.json".to_string(),
            stats_path: "/api/timeSeries/save.json".to_string(),
            secure: false,
            agent: "rust".to_string(),
        }
    }

    fn dispatcher() -> HttpDispatcher {
        HttpDispatcher::new(&Config {
            auth_token: Some("mock-token".to_string()),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
    }

    #[test]
    fn test_endpoint_url_encodes_token() {
        let metadata = DeliveryMetadata {
            auth_token: "a b&c".to_string(),
            host: "api.oohlalog.com".to_string(),
            port: 443,
            path: "/api/logging/save.json".to_string(),
            stats_path: "/api/timeSeries/save.json".to_string(),
            secure: true,
            agent: "rust".to_string(),
        };
        let url = endpoint_url(&metadata, &metadata.path).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.oohlalog.com/api/logging/save.json?apiKey=a+b%26c"
        );
    }

    #[test]
    fn test_endpoint_url_rejects_bad_host() {
        let metadata = DeliveryMetadata {
            auth_token: "t".to_string(),
            host: "bad host".to_string(),
            port: 80,
            path: "/p".to_string(),
            stats_path: "/s".to_string(),
            secure: false,
            agent: "rust".to_string(),
        };
        assert!(matches!(
            endpoint_url(&metadata, "/p"),
            Err(DeliveryError::Url(_))
        ));
    }

    #[test]
    fn test_redact_hides_token() {
        let url = Url::parse("http://localhost:8196/p?apiKey=secret").unwrap();
        let redacted = redact(&url);
        assert!(!redacted.contains("secret"));
        assert!(redacted.ends_with("apiKey=<redacted>"));
    }

    #[tokio::test]
    async fn test_deliver_posts_messages() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/logging/save.json")
            .match_query(Matcher::UrlEncoded("apiKey".into(), "mock-token".into()))
            .match_header("Content-Type", "application/json")
            .match_body(Matcher::PartialJsonString(
                r#"{"agent":"rust","messages":[{"level":"INFO","message":"hello"}]}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"insertCount":1,"success":true}"#)
            .create_async()
            .await;

        let batch = BatchPayload::new(
            vec![LogEntry::new(Level::Info, "hello", "app")],
            metadata_for(&server),
        );
        dispatcher().deliver(&batch).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_non_success_is_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/logging/save.json")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let batch = BatchPayload::new(
            vec![LogEntry::new(Level::Error, "boom", "app")],
            metadata_for(&server),
        );
        let err = dispatcher().deliver(&batch).await.unwrap_err();
        match err {
            DeliveryError::Status { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "Internal Server Error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_unreachable_host_is_error() {
        let metadata = DeliveryMetadata {
            auth_token: "t".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            path: "/p".to_string(),
            stats_path: "/s".to_string(),
            secure: false,
            agent: "rust".to_string(),
        };
        let batch = BatchPayload::new(vec![LogEntry::new(Level::Info, "x", "app")], metadata);
        assert!(matches!(
            dispatcher().deliver(&batch).await,
            Err(DeliveryError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_deliver_stats_uses_stats_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/timeSeries/save.json")
            .match_query(Matcher::UrlEncoded("apiKey".into(), "mock-token".into()))
            .match_body(Matcher::PartialJsonString(
                r#"{"host":"web-1","metrics":{"usedMemory":2048.0}}"#.to_string(),
            ))
            .with_status(202)
            .create_async()
            .await;

        let stats = StatsPayload {
            metrics: BTreeMap::from([("usedMemory".to_string(), 2048.0)]),
            host: "web-1".to_string(),
            metadata: metadata_for(&server),
        };
        dispatcher().deliver_stats(&stats).await.unwrap();
        mock.assert_async().await;
    }
}
