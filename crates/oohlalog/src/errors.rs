// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while validating a [`Config`](crate::config::Config).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing auth token: set OOHLALOG_AUTH_TOKEN")]
    MissingAuthToken,
}

/// Errors returned by a [`Dispatcher`](crate::dispatcher::Dispatcher).
///
/// The flush controller treats every variant the same way: the attempt
/// failed, entries stay buffered and the cooldown starts.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to build endpoint URL: {0}")]
    Url(String),

    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Endpoint responded with {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}
