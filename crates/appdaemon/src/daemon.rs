//! Daemon wiring: builds every component, runs them until shutdown and
//! tears them down.

use crate::control::{ConfigSource, ControlMessage, ControlPlane, ShutdownSignal};
use crate::forward::{HttpForwarder, LogForwarder};
use crate::http_server::MetricsServer;
use crate::launcher::{CommandLauncher, ProcessLauncher};
use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::telemetry::LogIngest;
use crate::types::{ApplicationDescriptor, DaemonConfig};
use healthcheck::{HealthChecker, HttpChecker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the daemon stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The control channel closed
    Clean,
    /// A signal requested the shutdown
    Signal(ShutdownSignal),
}

impl Shutdown {
    pub fn exit_code(&self) -> u8 {
        match self {
            Shutdown::Clean => 0,
            Shutdown::Signal(signal) => signal.exit_code(),
        }
    }
}

/// The supervision daemon
pub struct Daemon {
    config: DaemonConfig,
    apps: Vec<ApplicationDescriptor>,
    source: Arc<dyn ConfigSource>,
    registry: Arc<Registry>,
    launcher: Arc<dyn ProcessLauncher>,
    checker: Option<Arc<dyn HealthChecker>>,
    forwarder: Option<Arc<dyn LogForwarder>>,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        apps: Vec<ApplicationDescriptor>,
        source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            config,
            apps,
            source,
            registry: Arc::new(Registry::new()),
            launcher: Arc::new(CommandLauncher::new()),
            checker: None,
            forwarder: None,
        }
    }

    /// Replace the child-process launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the HTTP health checker
    pub fn with_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Replace the HTTP log forwarder
    pub fn with_forwarder(mut self, forwarder: Arc<dyn LogForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Run with OS signals as the control source
    #[cfg(unix)]
    pub async fn run(self) -> common::Result<Shutdown> {
        let (tx, rx) = mpsc::channel(self.config.control_channel_size.max(1));
        let cancel = CancellationToken::new();

        let signals = crate::control::SignalListener::install()?;
        let signal_task = tokio::spawn(signals.run(tx, cancel.clone()));

        let result = self.serve(rx, cancel).await;
        signal_task.abort();
        result
    }

    /// Run until a shutdown message arrives on `rx`, `rx` closes, or `cancel`
    /// fires.
    pub async fn serve(
        self,
        rx: mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
    ) -> common::Result<Shutdown> {
        let config = Arc::new(self.config);
        let metrics = config.metrics.then(|| Arc::new(MetricsRegistry::new()));
        let (config_tx, config_rx) = watch::channel(config.clone());

        self.registry.load(self.apps).await;

        let forwarder: Arc<dyn LogForwarder> = match self.forwarder {
            Some(forwarder) => forwarder,
            None => Arc::new(
                HttpForwarder::new(config.forward_timeout).map_err(common::Error::telemetry)?,
            ),
        };

        // Bind everything before any child is spawned
        let ingest = LogIngest::bind(
            (config.telemetry_bind.as_str(), config.port),
            forwarder,
            config_rx.clone(),
        )
        .await
        .map_err(|e| {
            common::Error::telemetry(format!(
                "failed to bind {}:{}: {}",
                config.telemetry_bind, config.port, e
            ))
        })?
        .with_metrics(metrics.clone());

        let metrics_server = match metrics {
            Some(ref m) => Some(
                MetricsServer::bind(
                    config.metrics_listen_addr.as_str(),
                    m.clone(),
                    self.registry.clone(),
                )
                .await
                .map_err(|e| {
                    common::Error::other(format!(
                        "failed to bind metrics server on {}: {}",
                        config.metrics_listen_addr, e
                    ))
                })?,
            ),
            None => None,
        };

        let checker: Arc<dyn HealthChecker> = match self.checker {
            Some(checker) => checker,
            None => Arc::new(
                HttpChecker::new(Vec::new(), config.probe_timeout)
                    .map_err(common::Error::healthcheck)?,
            ),
        };

        start_services(&self.registry, self.launcher.as_ref()).await;

        let mut tasks = JoinSet::new();
        tasks.spawn(ingest.run(cancel.clone()));

        if config.monitoring {
            let scheduler = Scheduler::new(
                self.registry.clone(),
                checker,
                self.launcher.clone(),
                config_rx,
            )
            .with_metrics(metrics.clone());
            tasks.spawn(scheduler.run(cancel.clone()));
        } else {
            info!("Monitoring disabled");
        }

        if let Some(server) = metrics_server {
            let cancel = cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = server.run(cancel).await {
                    warn!(error = %e, "Metrics server error");
                }
            });
        }

        let services = self.registry.len().await;
        info!(services, "Daemon running");

        let plane = ControlPlane::new(
            rx,
            self.source,
            self.registry.clone(),
            self.launcher.clone(),
            config_tx,
            cancel.clone(),
        )
        .with_metrics(metrics);
        let signal = plane.run().await;

        // The scheduler bounds its own wait by the grace period
        let drain = async { while tasks.join_next().await.is_some() {} };
        let limit = config.shutdown_grace + Duration::from_secs(1);
        if tokio::time::timeout(limit, drain).await.is_err() {
            warn!("Tasks still running after shutdown grace period, aborting");
            tasks.abort_all();
        }

        self.launcher.stop_all().await;

        let shutdown = match signal {
            Some(signal) => Shutdown::Signal(signal),
            None => Shutdown::Clean,
        };
        info!(?shutdown, "Daemon stopped");
        Ok(shutdown)
    }
}

/// Start every launchable service
async fn start_services(registry: &Registry, launcher: &dyn ProcessLauncher) {
    for record in registry.snapshot().await {
        let descriptor = &record.descriptor;
        if !descriptor.is_launchable() {
            continue;
        }
        if let Err(e) = launcher.start(descriptor).await {
            warn!(service = %descriptor.name, error = %e, "Failed to start service");
        }
    }
}
