//! Types shared across the daemon: descriptors, service records and the
//! resolved daemon configuration.

use chrono::{DateTime, Utc};
use common::LogFormat;
use healthcheck::{ProbeTarget, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Static description of one managed service, as found in the application list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    /// Unique service name
    pub name: String,

    /// Base address used to reach the service
    #[serde(rename = "url")]
    pub service_url: String,

    /// Path appended to the service URL to form the probe endpoint
    #[serde(rename = "healthcheckURL", default)]
    pub health_check_path: String,

    /// Interpreter used to run `launch_path` (empty for native executables)
    #[serde(default)]
    pub runtime: String,

    /// Program or script to launch (empty when the service is managed elsewhere)
    #[serde(rename = "path", default)]
    pub launch_path: String,

    /// Launch arguments, split shell-style
    #[serde(rename = "args", default)]
    pub launch_args: String,

    /// Port the service listens on
    #[serde(default)]
    pub port: u16,
}

impl ApplicationDescriptor {
    /// Endpoint probed for this service.
    ///
    /// The descriptor port is applied when the service URL carries no port of
    /// its own. A port written in the URL is kept even when it is the scheme
    /// default. An empty health-check path probes the bare service URL.
    pub fn probe_url(&self) -> String {
        let base = match reqwest::Url::parse(&self.service_url) {
            Ok(url) if has_explicit_port(&self.service_url) => with_written_port(&url),
            Ok(mut url) => {
                if self.port != 0 {
                    // Fails only for URLs that cannot carry a port
                    let _ = url.set_port(Some(self.port));
                }
                url.to_string()
            }
            Err(_) => self.service_url.clone(),
        };

        let path = self.health_check_path.trim();
        if path.is_empty() {
            return base;
        }

        let base = base.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Probe target handed to the health checker
    pub fn probe_target(&self) -> ProbeTarget {
        ProbeTarget::new(self.name.clone(), self.probe_url())
    }

    /// Whether the daemon is responsible for starting this service
    pub fn is_launchable(&self) -> bool {
        !self.launch_path.trim().is_empty()
    }
}

/// Whether the authority of `raw` spells out a port
fn has_explicit_port(raw: &str) -> bool {
    let raw = raw.trim();
    let rest = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    match host.rfind(']') {
        Some(end) => host[end..].contains(':'),
        None => host.contains(':'),
    }
}

/// Serialize `url` keeping its port, which the url crate drops when it
/// equals the scheme default
fn with_written_port(url: &reqwest::Url) -> String {
    let serialized = url.to_string();
    if url.port().is_some() {
        return serialized;
    }
    let (Some(port), Some(scheme_end)) = (url.port_or_known_default(), serialized.find("://"))
    else {
        return serialized;
    };

    let start = scheme_end + 3;
    let end = serialized[start..]
        .find('/')
        .map_or(serialized.len(), |i| start + i);
    format!("{}:{}{}", &serialized[..end], port, &serialized[end..])
}

/// Health status of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Registered, never probed
    Unknown,
    Healthy,
    Unhealthy,
    /// A restart was requested and has not been confirmed by a probe yet
    Restarting,
    /// No longer in the configuration; ignores probe outcomes
    Removed,
}

impl ServiceStatus {
    /// All statuses, in gauge order
    pub const ALL: [ServiceStatus; 5] = [
        ServiceStatus::Unknown,
        ServiceStatus::Healthy,
        ServiceStatus::Unhealthy,
        ServiceStatus::Restarting,
        ServiceStatus::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Restarting => "restarting",
            ServiceStatus::Removed => "removed",
        }
    }

    /// Numeric value exported by the status gauge
    pub fn gauge_value(&self) -> i64 {
        match self {
            ServiceStatus::Unknown => 0,
            ServiceStatus::Healthy => 1,
            ServiceStatus::Unhealthy => 2,
            ServiceStatus::Restarting => 3,
            ServiceStatus::Removed => 4,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-service state owned by the registry
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRecord {
    pub descriptor: ApplicationDescriptor,
    pub status: ServiceStatus,

    /// Exhausted-retry failures since the last success
    pub consecutive_failures: u32,

    /// Completion time of the most recent applied probe
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Edge-trigger latch: set by a success, consumed by a restart request
    pub restart_armed: bool,
}

impl ServiceRecord {
    /// Create a fresh record for a newly registered service
    pub fn new(descriptor: ApplicationDescriptor) -> Self {
        Self {
            descriptor,
            status: ServiceStatus::Unknown,
            consecutive_failures: 0,
            last_checked_at: None,
            restart_armed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// One datagram received by the telemetry listener
#[derive(Debug, Clone)]
pub struct TelemetryMessage {
    pub payload: Vec<u8>,
    pub sender: SocketAddr,
    pub received_at: DateTime<Utc>,
}

impl TelemetryMessage {
    /// Stamp a datagram with the current time
    pub fn new(payload: Vec<u8>, sender: SocketAddr) -> Self {
        Self {
            payload,
            sender,
            received_at: Utc::now(),
        }
    }

    /// Payload decoded as UTF-8, invalid sequences replaced
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Resolved daemon configuration
///
/// Built once at startup and rebuilt wholesale on every reload.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Run the health-check scheduler
    pub monitoring: bool,

    /// Interval between probing rounds
    pub interval: Duration,

    /// Retry budget per probe
    pub retry: RetryPolicy,

    /// Timeout of a single probe attempt
    pub probe_timeout: Duration,

    /// Request restarts of failing services
    pub restart_on_failure: bool,

    /// Grace period for in-flight probes at shutdown
    pub shutdown_grace: Duration,

    /// Telemetry listener bind address
    pub telemetry_bind: String,

    /// Telemetry listener port
    pub port: u16,

    /// Upstream URL telemetry messages are relayed to
    pub forward: Option<String>,

    /// Timeout for relaying one telemetry message
    pub forward_timeout: Duration,

    /// Serve Prometheus metrics and the status endpoint
    pub metrics: bool,

    /// Metrics server listen address
    pub metrics_listen_addr: String,

    /// Application list file
    pub app_file: Option<PathBuf>,

    /// Control message channel buffer size
    pub control_channel_size: usize,

    /// Default log level when RUST_LOG is not set
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            monitoring: true,
            interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_secs(5),
            restart_on_failure: false,
            shutdown_grace: Duration::from_secs(5),
            telemetry_bind: "0.0.0.0".to_string(),
            port: 200,
            forward: None,
            forward_timeout: Duration::from_secs(5),
            metrics: false,
            metrics_listen_addr: "127.0.0.1:9464".to_string(),
            app_file: None,
            control_channel_size: 8,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
