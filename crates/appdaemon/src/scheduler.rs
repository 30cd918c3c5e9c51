//! Health-check scheduler.
//!
//! Every interval the scheduler takes a registry snapshot, spawns one probe
//! task per service that is not `Removed`, and joins all of them before the
//! next round may start. Each task feeds its final outcome through the
//! registry's state machine and fires a restart when one is requested.

use crate::launcher::ProcessLauncher;
use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::state_machine::{Observation, Transition};
use crate::types::{ApplicationDescriptor, DaemonConfig, ServiceStatus};
use healthcheck::{HealthChecker, check_with_retry};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Summary of one probing round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    /// Probe tasks spawned
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Outcomes dropped because the service was removed mid-round
    pub discarded: usize,
    /// Restarts requested by this round
    pub restarts: usize,
    /// Probes still in flight when the shutdown grace period ran out
    pub abandoned: usize,
}

impl RoundReport {
    fn tally(&mut self, result: ProbeResult) {
        match result {
            ProbeResult::Applied { healthy, restart } => {
                if healthy {
                    self.healthy += 1;
                } else {
                    self.unhealthy += 1;
                }
                if restart {
                    self.restarts += 1;
                }
            }
            ProbeResult::Discarded => self.discarded += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ProbeResult {
    Applied { healthy: bool, restart: bool },
    Discarded,
}

/// Shared handles cloned into every probe task
#[derive(Clone)]
struct ProbeContext {
    registry: Arc<Registry>,
    checker: Arc<dyn HealthChecker>,
    launcher: Arc<dyn ProcessLauncher>,
    metrics: Option<Arc<MetricsRegistry>>,
    config: Arc<DaemonConfig>,
}

/// Periodic health-check scheduler
pub struct Scheduler {
    registry: Arc<Registry>,
    checker: Arc<dyn HealthChecker>,
    launcher: Arc<dyn ProcessLauncher>,
    config: watch::Receiver<Arc<DaemonConfig>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        checker: Arc<dyn HealthChecker>,
        launcher: Arc<dyn ProcessLauncher>,
        config: watch::Receiver<Arc<DaemonConfig>>,
    ) -> Self {
        Self {
            registry,
            checker,
            launcher,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run rounds until `cancel` fires.
    ///
    /// The first round starts immediately. Missed ticks are skipped, and an
    /// interval change published by a reload takes effect after the current
    /// round.
    pub async fn run(self, cancel: CancellationToken) {
        let mut period = self.config.borrow().interval;
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?period, "Scheduler started");

        let mut round = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            round += 1;
            let report = self.run_round(round, &cancel).await;
            if report.abandoned > 0 {
                break;
            }

            let current = self.config.borrow().interval;
            if current != period {
                info!(old = ?period, new = ?current, "Probe interval changed");
                period = current;
                ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }
        }

        info!(rounds = round, "Scheduler stopped");
    }

    /// Run one round: probe every non-removed service concurrently and join.
    ///
    /// If `cancel` fires mid-round the in-flight probes get the configured
    /// shutdown grace period, after which they are aborted.
    pub async fn run_round(&self, round: u64, cancel: &CancellationToken) -> RoundReport {
        let started = Instant::now();
        let config = self.config.borrow().clone();
        let mut report = RoundReport {
            round,
            ..RoundReport::default()
        };

        let ctx = ProbeContext {
            registry: self.registry.clone(),
            checker: self.checker.clone(),
            launcher: self.launcher.clone(),
            metrics: self.metrics.clone(),
            config: config.clone(),
        };

        let mut tasks = JoinSet::new();
        for record in self.registry.snapshot().await {
            if record.status == ServiceStatus::Removed {
                continue;
            }
            tasks.spawn(probe(ctx.clone(), record.descriptor));
        }
        report.probed = tasks.len();

        let mut deadline: Option<Instant> = None;
        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = cancel.cancelled(), if deadline.is_none() => {
                    debug!(round, in_flight = tasks.len(), grace = ?config.shutdown_grace, "Waiting for in-flight probes");
                    deadline = Some(Instant::now() + config.shutdown_grace);
                    continue;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    report.abandoned = tasks.len();
                    warn!(round, abandoned = report.abandoned, "Abandoning in-flight probes");
                    tasks.abort_all();
                    break;
                }
            };

            match joined {
                Some(Ok(result)) => report.tally(result),
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => error!(round, error = %e, "Probe task failed"),
                None => break,
            }
        }

        if let Some(ref m) = self.metrics {
            m.update_services_by_status(&self.registry.status_counts().await);
            m.record_round(started.elapsed());
        }

        debug!(
            round,
            probed = report.probed,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            discarded = report.discarded,
            restarts = report.restarts,
            elapsed = ?started.elapsed(),
            "Round finished"
        );

        report
    }
}

/// Probe one service and apply the final outcome
async fn probe(ctx: ProbeContext, descriptor: ApplicationDescriptor) -> ProbeResult {
    let target = descriptor.probe_target();
    let outcome = check_with_retry(ctx.checker.as_ref(), &target, &ctx.config.retry).await;

    if let Some(ref m) = ctx.metrics {
        for attempt in &outcome.attempts {
            m.record_probe_attempt(&descriptor.name, attempt.status.as_label(), attempt.duration);
        }
    }

    let observation = Observation::from(&outcome);
    let Some(transition) = ctx
        .registry
        .record_outcome(&descriptor.name, observation, ctx.config.restart_on_failure)
        .await
    else {
        debug!(service = %descriptor.name, "Discarding outcome for removed service");
        return ProbeResult::Discarded;
    };

    let healthy = observation == Observation::Success;

    if let Some(ref m) = ctx.metrics {
        m.record_probe_outcome(
            &descriptor.name,
            healthy,
            transition.to,
            transition.consecutive_failures,
        );
        if transition.changed() {
            m.record_transition(&descriptor.name, transition.from, transition.to);
        }
    }

    log_transition(&descriptor, &target.url, &transition, &outcome);

    if transition.restart_requested {
        spawn_restart(ctx, descriptor);
    }

    ProbeResult::Applied {
        healthy,
        restart: transition.restart_requested,
    }
}

fn log_transition(
    descriptor: &ApplicationDescriptor,
    url: &str,
    transition: &Transition,
    outcome: &healthcheck::ProbeOutcome,
) {
    let reason = outcome
        .last()
        .and_then(|r| r.message.as_deref())
        .unwrap_or("");

    if !transition.changed() {
        debug!(
            service = %descriptor.name,
            status = %transition.to,
            failures = transition.consecutive_failures,
            attempts = outcome.attempt_count(),
            "Probe finished"
        );
        return;
    }

    match transition.to {
        ServiceStatus::Healthy => info!(
            service = %descriptor.name,
            from = %transition.from,
            url,
            "Service is healthy"
        ),
        ServiceStatus::Restarting => warn!(
            service = %descriptor.name,
            failures = transition.consecutive_failures,
            reason,
            "Service still failing, restarting"
        ),
        _ => warn!(
            service = %descriptor.name,
            from = %transition.from,
            to = %transition.to,
            failures = transition.consecutive_failures,
            attempts = outcome.attempt_count(),
            url,
            reason,
            "Service is down"
        ),
    }
}

/// Fire-and-forget restart; a failure returns the record to `Unhealthy`
fn spawn_restart(ctx: ProbeContext, descriptor: ApplicationDescriptor) {
    tokio::spawn(async move {
        let name = descriptor.name.clone();
        match ctx.launcher.restart(&descriptor).await {
            Ok(()) => {
                info!(service = %name, "Restart requested");
                if let Some(ref m) = ctx.metrics {
                    m.record_restart(&name, true);
                }
            }
            Err(e) => {
                error!(service = %name, error = %e, "Restart failed");
                if let Some(ref m) = ctx.metrics {
                    m.record_restart(&name, false);
                }
                if ctx.registry.restart_failed(&name).await {
                    if let Some(ref m) = ctx.metrics {
                        m.set_service_status(&name, ServiceStatus::Unhealthy);
                    }
                }
            }
        }
    });
}
