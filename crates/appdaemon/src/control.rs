//! Control plane: OS signals become control messages consumed by one loop.
//!
//! SIGHUP reloads flags, the settings file and the application list, then
//! merges the result into the registry and reconciles the launcher. SIGINT
//! and SIGTERM cancel the process-wide token.

use crate::apps;
use crate::config::{self, Cli};
use crate::launcher::ProcessLauncher;
use crate::metrics::MetricsRegistry;
use crate::registry::{LoadReport, Registry};
use crate::types::{ApplicationDescriptor, DaemonConfig, ServiceStatus};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Signal that initiated a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    /// Conventional exit status: 128 + signal number
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Message consumed by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Reload,
    Shutdown(ShutdownSignal),
}

/// Daemon configuration together with the application list it points at
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DaemonConfig,
    pub apps: Vec<ApplicationDescriptor>,
}

/// Where reloads read their configuration from
pub trait ConfigSource: Send + Sync {
    /// Blocking load; called from a blocking task
    fn load(&self) -> common::Result<LoadedConfig>;
}

/// Re-reads the settings file and application list using the startup flags
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    cli: Cli,
}

impl FileConfigSource {
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> common::Result<LoadedConfig> {
        let config = config::load_with_cli(&self.cli)?;
        let apps = apps::load_applications(config.app_file.as_deref())?;
        Ok(LoadedConfig { config, apps })
    }
}

/// Translates process signals into [`ControlMessage`]s
#[cfg(unix)]
pub struct SignalListener {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Register the signal handlers. Must run inside a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Forward signals to `tx` until `cancel` fires or the receiver is gone
    pub async fn run(mut self, tx: mpsc::Sender<ControlMessage>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.hangup.recv() => ControlMessage::Reload,
                _ = self.interrupt.recv() => ControlMessage::Shutdown(ShutdownSignal::Interrupt),
                _ = self.terminate.recv() => ControlMessage::Shutdown(ShutdownSignal::Terminate),
            };

            info!(?message, "Signal received");
            if tx.send(message).await.is_err() {
                break;
            }
        }
        debug!("Signal listener stopped");
    }
}

/// Names of settings that only take effect after a daemon restart
pub fn static_changes(previous: &DaemonConfig, next: &DaemonConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if previous.monitoring != next.monitoring {
        changed.push("monitoring");
    }
    if previous.probe_timeout != next.probe_timeout {
        changed.push("probe_timeout");
    }
    if previous.telemetry_bind != next.telemetry_bind || previous.port != next.port {
        changed.push("telemetry address");
    }
    if previous.forward_timeout != next.forward_timeout {
        changed.push("forward_timeout");
    }
    if previous.metrics != next.metrics || previous.metrics_listen_addr != next.metrics_listen_addr
    {
        changed.push("metrics");
    }
    if previous.control_channel_size != next.control_channel_size {
        changed.push("control channel size");
    }
    if previous.log_level != next.log_level || previous.log_format != next.log_format {
        changed.push("logging");
    }
    changed
}

/// The control loop
pub struct ControlPlane {
    rx: mpsc::Receiver<ControlMessage>,
    source: Arc<dyn ConfigSource>,
    registry: Arc<Registry>,
    launcher: Arc<dyn ProcessLauncher>,
    config_tx: watch::Sender<Arc<DaemonConfig>>,
    metrics: Option<Arc<MetricsRegistry>>,
    cancel: CancellationToken,
}

impl ControlPlane {
    pub fn new(
        rx: mpsc::Receiver<ControlMessage>,
        source: Arc<dyn ConfigSource>,
        registry: Arc<Registry>,
        launcher: Arc<dyn ProcessLauncher>,
        config_tx: watch::Sender<Arc<DaemonConfig>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            source,
            registry,
            launcher,
            config_tx,
            metrics: None,
            cancel,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Consume control messages until shutdown.
    ///
    /// Returns the signal that requested the shutdown, or `None` when the
    /// channel closed or the token was cancelled elsewhere. The token is
    /// cancelled on every exit path.
    pub async fn run(mut self) -> Option<ShutdownSignal> {
        info!("Control plane started");

        let signal = loop {
            let message = tokio::select! {
                biased;
                message = self.rx.recv() => message,
                _ = self.cancel.cancelled() => break None,
            };

            match message {
                Some(ControlMessage::Reload) => {
                    // Failures are logged and the previous configuration kept
                    let _ = self.reload().await;
                }
                Some(ControlMessage::Shutdown(signal)) => {
                    info!(%signal, "Shutting down");
                    break Some(signal);
                }
                None => {
                    info!("Control channel closed, shutting down");
                    break None;
                }
            }
        };

        self.cancel.cancel();
        signal
    }

    /// Reload configuration and merge it into the registry.
    ///
    /// On failure nothing is changed.
    pub async fn reload(&self) -> common::Result<LoadReport> {
        info!("Reloading configuration");

        let source = self.source.clone();
        let loaded = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(common::Error::other)
            .and_then(|loaded| loaded);

        let LoadedConfig { config, apps } = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Reload failed, keeping previous configuration");
                if let Some(ref m) = self.metrics {
                    m.record_reload(false);
                }
                return Err(e);
            }
        };

        let previous = self.config_tx.borrow().clone();
        let ignored = static_changes(&previous, &config);
        if !ignored.is_empty() {
            warn!(settings = ?ignored, "Changed settings take effect after a restart");
        }

        self.config_tx.send_replace(Arc::new(config));
        let report = self.registry.load(apps).await;
        self.reconcile(&report).await;

        if let Some(ref m) = self.metrics {
            m.record_reload(true);
            for name in &report.removed {
                m.set_service_status(name, ServiceStatus::Removed);
            }
            for name in report.purged.iter().chain(&report.added) {
                m.forget_service(name);
            }
            m.update_services_by_status(&self.registry.status_counts().await);
        }

        info!(
            added = ?report.added,
            changed = ?report.changed,
            removed = ?report.removed,
            "Configuration reloaded"
        );
        Ok(report)
    }

    /// Start added services, restart changed ones and stop removed ones
    async fn reconcile(&self, report: &LoadReport) {
        for name in &report.removed {
            if let Err(e) = self.launcher.stop(name).await {
                warn!(service = %name, error = %e, "Failed to stop removed service");
            }
        }

        for name in report.added.iter().chain(&report.changed) {
            let Some(record) = self.registry.get(name).await else {
                continue;
            };
            let descriptor = &record.descriptor;
            let is_new = report.added.contains(name);

            let result = match (descriptor.is_launchable(), is_new) {
                (true, true) => self.launcher.start(descriptor).await,
                (true, false) => self.launcher.restart(descriptor).await,
                // No longer ours to run
                (false, false) => self.launcher.stop(name).await,
                (false, true) => Ok(()),
            };

            if let Err(e) = result {
                warn!(service = %name, error = %e, "Failed to reconcile service");
            }
        }
    }
}
