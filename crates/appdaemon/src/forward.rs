//! Relaying of telemetry messages to an upstream collector.

use crate::types::TelemetryMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Forwarding error types
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Failed to forward to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Collector {url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

impl From<ForwardError> for common::Error {
    fn from(err: ForwardError) -> Self {
        common::Error::telemetry(err)
    }
}

/// Sends telemetry messages somewhere else
#[async_trait]
pub trait LogForwarder: Send + Sync {
    async fn forward(&self, target: &str, message: &TelemetryMessage) -> Result<(), ForwardError>;
}

/// JSON document posted to the collector
#[derive(Debug, Serialize)]
pub struct ForwardedMessage<'a> {
    pub received_at: DateTime<Utc>,
    pub sender: String,
    pub payload: std::borrow::Cow<'a, str>,
}

impl<'a> From<&'a TelemetryMessage> for ForwardedMessage<'a> {
    fn from(message: &'a TelemetryMessage) -> Self {
        Self {
            received_at: message.received_at,
            sender: message.sender.to_string(),
            payload: message.payload_lossy(),
        }
    }
}

/// Forwarder posting each message as JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// Create a forwarder whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogForwarder for HttpForwarder {
    async fn forward(&self, target: &str, message: &TelemetryMessage) -> Result<(), ForwardError> {
        let body = ForwardedMessage::from(message);

        let response = self
            .client
            .post(target)
            .json(&body)
            .send()
            .await
            .map_err(|source| ForwardError::Request {
                url: target.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ForwardError::Status {
                url: target.to_string(),
                status,
            })
        }
    }
}
