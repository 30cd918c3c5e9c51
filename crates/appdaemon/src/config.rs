//! Configuration loading and validation for the daemon
//!
//! Settings are layered: built-in defaults, then an optional YAML settings
//! file, then command-line flags. The result is a [`DaemonConfig`].

use crate::types::DaemonConfig;
use clap::Parser;
use common::LogFormat;
use healthcheck::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("Invalid command line: {0}")]
    CommandLine(#[from] clap::Error),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        common::Error::config(err)
    }
}

/// Command-line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "appdaemon",
    version,
    about = "Minimal process supervision daemon with health checks"
)]
pub struct Cli {
    /// YAML settings file
    #[arg(long, short = 'I')]
    pub config: Option<PathBuf>,

    /// Run periodic health checks
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub monitoring: Option<bool>,

    /// UDP port of the telemetry listener
    #[arg(long)]
    pub port: Option<u16>,

    /// Interval between probing rounds (e.g. 2s, 500ms)
    #[arg(long, alias = "Interval", value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Serve Prometheus metrics and the status endpoint
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub metrics: Option<bool>,

    /// Restart services that keep failing their health checks
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub restart: Option<bool>,

    /// Relay telemetry messages to this URL
    #[arg(long)]
    pub forward: Option<String>,

    /// Application list file
    #[arg(long, alias = "appFile")]
    pub app_file: Option<PathBuf>,

    /// Default log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long)]
    pub log_format: Option<String>,
}

/// Settings file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub monitoring: MonitoringSettings,

    #[serde(default)]
    pub supervision: SupervisionSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub apps: AppsSettings,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Settings {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.monitoring.validate()?;
        self.supervision.validate()?;
        self.telemetry.validate()?;
        self.metrics.validate()?;
        self.control.validate()?;

        if let Some(url) = &self.telemetry.forward {
            if let Err(e) = validate_forward_url(url) {
                let mut errors = ValidationErrors::new();
                errors.add("forward", e);
                return Err(errors);
            }
        }
        Ok(())
    }
}

/// Health-check scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitoringSettings {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub interval: Duration,

    #[validate(range(min = 1, max = 10))]
    pub retry_attempts: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_retry_delay")]
    pub retry_delay: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub probe_timeout: Duration,
}

/// Failure handling settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SupervisionSettings {
    pub restart_on_failure: bool,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_shutdown_grace")]
    pub shutdown_grace: Duration,
}

/// Telemetry listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TelemetrySettings {
    #[validate(custom = "validate_bind_addr")]
    pub bind_addr: String,

    pub port: u16,

    pub forward: Option<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub forward_timeout: Duration,
}

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// Application list settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsSettings {
    pub file: Option<PathBuf>,
}

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControlSettings {
    #[validate(range(min = 1, max = 1024))]
    pub channel_size: usize,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

// Default implementations

impl Default for MonitoringSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            enabled: true,
            interval: Duration::from_secs(2),
            retry_attempts: retry.attempts,
            retry_delay: retry.delay,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self {
            restart_on_failure: false,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 200,
            forward: None,
            forward_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self { channel_size: 8 }
    }
}

// Custom validators

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(100..=3_600_000).contains(&millis) {
        return Err(ValidationError::new("interval_out_of_range"));
    }
    Ok(())
}

fn validate_retry_delay(delay: &Duration) -> Result<(), ValidationError> {
    if delay.as_secs() > 60 {
        return Err(ValidationError::new("retry_delay_out_of_range"));
    }
    Ok(())
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("timeout_out_of_range"));
    }
    Ok(())
}

fn validate_shutdown_grace(grace: &Duration) -> Result<(), ValidationError> {
    if grace.as_secs() > 60 {
        return Err(ValidationError::new("shutdown_grace_out_of_range"));
    }
    Ok(())
}

fn validate_bind_addr(addr: &str) -> Result<(), ValidationError> {
    addr.trim()
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("bind_addr_invalid"))
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.trim()
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_forward_url(url: &str) -> Result<(), ValidationError> {
    match reqwest::Url::parse(url.trim()) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ValidationError::new("forward_url_invalid")),
    }
}

// Configuration loading implementation

impl Settings {
    /// Load settings from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Find settings file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/appdaemon/appdaemon.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./appdaemon.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/appdaemon/appdaemon.yaml"))
    }

    /// Apply command-line flags on top of the file settings
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(monitoring) = cli.monitoring {
            self.monitoring.enabled = monitoring;
        }
        if let Some(interval) = cli.interval {
            self.monitoring.interval = interval;
        }
        if let Some(restart) = cli.restart {
            self.supervision.restart_on_failure = restart;
        }
        if let Some(port) = cli.port {
            self.telemetry.port = port;
        }
        if let Some(forward) = &cli.forward {
            // An empty flag value disables forwarding configured in the file
            self.telemetry.forward = Some(forward.clone()).filter(|f| !f.trim().is_empty());
        }
        if let Some(metrics) = cli.metrics {
            self.metrics.enabled = metrics;
        }
        if let Some(app_file) = &cli.app_file {
            self.apps.file = Some(app_file.clone());
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = &cli.log_format {
            self.logging.format = Some(format.clone());
        }
    }

    /// Convert to DaemonConfig
    pub fn to_daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            monitoring: self.monitoring.enabled,
            interval: self.monitoring.interval,
            retry: RetryPolicy {
                attempts: self.monitoring.retry_attempts,
                delay: self.monitoring.retry_delay,
            },
            probe_timeout: self.monitoring.probe_timeout,
            restart_on_failure: self.supervision.restart_on_failure,
            shutdown_grace: self.supervision.shutdown_grace,
            telemetry_bind: self.telemetry.bind_addr.trim().to_string(),
            port: self.telemetry.port,
            forward: self.telemetry.forward.clone(),
            forward_timeout: self.telemetry.forward_timeout,
            metrics: self.metrics.enabled,
            metrics_listen_addr: self.metrics.listen_addr.trim().to_string(),
            app_file: self.apps.file.clone(),
            control_channel_size: self.control.channel_size,
            log_level: self
                .logging
                .level
                .clone()
                .unwrap_or_else(|| "info".to_string()),
            log_format: self
                .logging
                .format
                .as_deref()
                .map(LogFormat::parse)
                .unwrap_or_default(),
        }
    }
}

/// Resolve the daemon configuration for already parsed flags.
pub fn load_with_cli(cli: &Cli) -> Result<DaemonConfig, ConfigError> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load()?,
    };

    settings.apply_cli(cli);
    // Flags may push values out of range
    settings.validate()?;

    Ok(settings.to_daemon_config())
}

/// Parse `args` (program name first) and resolve the daemon configuration.
pub fn load_from_args<I, T>(args: I) -> Result<DaemonConfig, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    load_with_cli(&cli)
}
