//! Health check implementations.

use crate::types::{HealthCheckResult, ProbeTarget};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Health checker trait
///
/// One checker is shared by every service; the target is passed per call.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Perform a single health check attempt against `target`
    async fn check(&self, target: &ProbeTarget) -> HealthCheckResult;

    /// Get the name of this checker
    fn name(&self) -> &str;
}

/// HTTP health checker
///
/// Issues `GET <target.url>`. With no expected codes configured any 2xx
/// response counts as healthy.
pub struct HttpChecker {
    expected_codes: Vec<u16>,
    timeout_duration: Duration,
    client: reqwest::Client,
}

impl HttpChecker {
    /// Create a new HTTP health checker
    pub fn new(expected_codes: Vec<u16>, timeout_duration: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout_duration)
            .build()?;

        Ok(Self::with_client(client, expected_codes, timeout_duration))
    }

    /// Create a checker around an existing client
    pub fn with_client(
        client: reqwest::Client,
        expected_codes: Vec<u16>,
        timeout_duration: Duration,
    ) -> Self {
        Self {
            expected_codes,
            timeout_duration,
            client,
        }
    }

    fn accepts(&self, status: reqwest::StatusCode) -> bool {
        if self.expected_codes.is_empty() {
            status.is_success()
        } else {
            self.expected_codes.contains(&status.as_u16())
        }
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self, target: &ProbeTarget) -> HealthCheckResult {
        let start = Instant::now();

        let request = self.client.get(&target.url);

        match timeout(self.timeout_duration, request.send()).await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                let status = response.status();

                if self.accepts(status) {
                    debug!(service = %target.name, url = %target.url, status = status.as_u16(),
                           duration_ms = duration.as_millis(), "HTTP check successful");
                    HealthCheckResult::healthy(duration).with_response_code(status.as_u16())
                } else {
                    warn!(service = %target.name, url = %target.url, status = status.as_u16(),
                          "HTTP check failed: unexpected status code");
                    HealthCheckResult::unhealthy(
                        duration,
                        format!("Unexpected status code: {}", status.as_u16()),
                    )
                    .with_response_code(status.as_u16())
                }
            }
            Ok(Err(e)) if e.is_timeout() => {
                let duration = start.elapsed();
                warn!(service = %target.name, url = %target.url, "HTTP check timed out");
                HealthCheckResult::timeout(duration)
            }
            Ok(Err(e)) => {
                let duration = start.elapsed();
                warn!(service = %target.name, url = %target.url, error = %e, "HTTP check failed");
                HealthCheckResult::error(duration, format!("HTTP request failed: {}", e))
            }
            Err(_) => {
                let duration = start.elapsed();
                warn!(service = %target.name, url = %target.url, "HTTP check timed out");
                HealthCheckResult::timeout(duration)
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
