//! Health check types and structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service answered with a success-class status
    Healthy,
    /// Service answered, but not with an accepted status
    Unhealthy,
    /// Health check timed out
    Timeout,
    /// Transport-level error (connection refused, DNS, TLS, ...)
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
            HealthStatus::Timeout => write!(f, "TIMEOUT"),
            HealthStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl HealthStatus {
    /// Short lowercase label, used for metrics and log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "success",
            HealthStatus::Unhealthy => "failure",
            HealthStatus::Timeout => "timeout",
            HealthStatus::Error => "error",
        }
    }
}

/// Result of a single probe attempt
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Status of the health check
    pub status: HealthStatus,

    /// Duration of the health check
    pub duration: Duration,

    /// Optional error message
    pub message: Option<String>,

    /// Response code (when a response was received)
    pub response_code: Option<u16>,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(duration: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            duration,
            message: None,
            response_code: None,
        }
    }

    /// Create an unhealthy result
    pub fn unhealthy(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            duration,
            message: Some(message.into()),
            response_code: None,
        }
    }

    /// Create a timeout result
    pub fn timeout(duration: Duration) -> Self {
        Self {
            status: HealthStatus::Timeout,
            duration,
            message: Some("Health check timed out".to_string()),
            response_code: None,
        }
    }

    /// Create an error result
    pub fn error(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            duration,
            message: Some(message.into()),
            response_code: None,
        }
    }

    /// Attach the HTTP status code that produced this result
    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    /// Check if the result is healthy
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Endpoint probed for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Service name, carried for logging
    pub name: String,

    /// Full probe URL (service URL plus health-check path)
    pub url: String,
}

impl ProbeTarget {
    /// Create a new probe target
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Retry budget applied to every probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per probe (at least one is always made)
    pub attempts: u32,

    /// Delay between consecutive attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Final outcome of a probe after the retry budget was applied
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Every attempt made, in order. Never empty.
    pub attempts: Vec<HealthCheckResult>,
}

impl ProbeOutcome {
    /// Whether the probe ended in success
    pub fn is_healthy(&self) -> bool {
        self.last().is_some_and(HealthCheckResult::is_healthy)
    }

    /// The attempt that decided the outcome
    pub fn last(&self) -> Option<&HealthCheckResult> {
        self.attempts.last()
    }

    /// Number of attempts made
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Total time spent in attempts, excluding inter-attempt delays
    pub fn total_duration(&self) -> Duration {
        self.attempts.iter().map(|a| a.duration).sum()
    }
}
