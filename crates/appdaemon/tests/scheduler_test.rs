//! Integration tests for the health-check scheduler

use appdaemon::launcher::{LaunchError, ProcessLauncher};
use appdaemon::metrics::MetricsRegistry;
use appdaemon::{ApplicationDescriptor, DaemonConfig, Registry, Scheduler, ServiceStatus};
use async_trait::async_trait;
use healthcheck::{HealthCheckResult, HealthChecker, ProbeTarget, RetryPolicy};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Checker answering from a per-service script of attempt results.
///
/// Services without a script (or with an exhausted one) use `fallback`.
struct ScriptedChecker {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    fallback: bool,
    latency: Duration,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedChecker {
    fn new(fallback: bool) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            latency: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn script(self, name: &str, attempts: &[bool]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), attempts.iter().copied().collect());
        self
    }

    fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthChecker for ScriptedChecker {
    async fn check(&self, target: &ProbeTarget) -> HealthCheckResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(target.name.clone()).or_default() += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let healthy = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&target.name)
            .and_then(|script| script.pop_front())
            .unwrap_or(self.fallback);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if healthy {
            HealthCheckResult::healthy(Duration::from_millis(1))
        } else {
            HealthCheckResult::error(Duration::from_millis(1), "connection refused")
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Launcher that only counts restart requests
#[derive(Default)]
struct CountingLauncher {
    restarts: AtomicUsize,
}

#[async_trait]
impl ProcessLauncher for CountingLauncher {
    async fn start(&self, _descriptor: &ApplicationDescriptor) -> Result<(), LaunchError> {
        Ok(())
    }

    async fn stop(&self, _name: &str) -> Result<(), LaunchError> {
        Ok(())
    }

    async fn restart(&self, _descriptor: &ApplicationDescriptor) -> Result<(), LaunchError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self, _name: &str) -> bool {
        true
    }

    async fn stop_all(&self) {}
}

fn app(name: &str) -> ApplicationDescriptor {
    ApplicationDescriptor {
        name: name.to_string(),
        service_url: format!("http://{}.invalid", name),
        health_check_path: "/healthcheck".to_string(),
        runtime: String::new(),
        launch_path: "./run".to_string(),
        launch_args: String::new(),
        port: 8080,
    }
}

fn config(attempts: u32, restart: bool) -> DaemonConfig {
    DaemonConfig {
        interval: Duration::from_secs(1),
        retry: RetryPolicy {
            attempts,
            delay: Duration::from_secs(1),
        },
        restart_on_failure: restart,
        shutdown_grace: Duration::from_secs(2),
        ..DaemonConfig::default()
    }
}

struct Harness {
    registry: Arc<Registry>,
    checker: Arc<ScriptedChecker>,
    launcher: Arc<CountingLauncher>,
    scheduler: Scheduler,
    config_tx: watch::Sender<Arc<DaemonConfig>>,
}

async fn harness(names: &[&str], checker: ScriptedChecker, config: DaemonConfig) -> Harness {
    let registry = Arc::new(Registry::new());
    registry.load(names.iter().map(|n| app(n)).collect()).await;

    let checker = Arc::new(checker);
    let launcher = Arc::new(CountingLauncher::default());
    let (config_tx, config_rx) = watch::channel(Arc::new(config));

    let scheduler = Scheduler::new(registry.clone(), checker.clone(), launcher.clone(), config_rx);

    Harness {
        registry,
        checker,
        launcher,
        scheduler,
        config_tx,
    }
}

#[tokio::test(start_paused = true)]
async fn test_mixed_round_scenario() {
    // A always ok, B always fails, C fails once then recovers within the retry budget
    let checker = ScriptedChecker::new(true)
        .script("b", &[false, false, false])
        .script("c", &[false, true]);
    let h = harness(&["a", "b", "c"], checker, config(3, false)).await;

    let report = h.scheduler.run_round(1, &CancellationToken::new()).await;
    assert_eq!(report.probed, 3);
    assert_eq!(report.healthy, 2);
    assert_eq!(report.unhealthy, 1);

    let a = h.registry.get("a").await.unwrap();
    let b = h.registry.get("b").await.unwrap();
    let c = h.registry.get("c").await.unwrap();

    assert_eq!(a.status, ServiceStatus::Healthy);
    assert_eq!(b.status, ServiceStatus::Unhealthy);
    assert_eq!(b.consecutive_failures, 1);
    assert_eq!(c.status, ServiceStatus::Healthy);
    assert_eq!(c.consecutive_failures, 0);

    assert_eq!(h.checker.calls("a"), 1);
    assert_eq!(h.checker.calls("b"), 3);
    assert_eq!(h.checker.calls("c"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_make_one_transition() {
    let checker = ScriptedChecker::new(true).script("a", &[true, false, false, false]);
    let mut h = harness(&["a"], checker, config(3, false)).await;
    let metrics = Arc::new(MetricsRegistry::new());
    h.scheduler = h.scheduler.with_metrics(Some(metrics.clone()));

    let cancel = CancellationToken::new();
    h.scheduler.run_round(1, &cancel).await;
    h.scheduler.run_round(2, &cancel).await;

    let record = h.registry.get("a").await.unwrap();
    assert_eq!(record.status, ServiceStatus::Unhealthy);
    assert_eq!(record.consecutive_failures, 1);

    let text = metrics.encode().unwrap();
    assert!(text.contains(r#"appdaemon_probe_attempts_total{service="a",result="error"} 3"#));
    assert!(text.contains(
        r#"appdaemon_status_transitions_total{service="a",from="healthy",to="unhealthy"} 1"#
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failures_accumulate_and_reset() {
    let checker = ScriptedChecker::new(true).script("a", &[false, false, false, true]);
    let h = harness(&["a"], checker, config(1, false)).await;
    let cancel = CancellationToken::new();

    for round in 1..=3 {
        h.scheduler.run_round(round, &cancel).await;
    }
    assert_eq!(h.registry.get("a").await.unwrap().consecutive_failures, 3);

    h.scheduler.run_round(4, &cancel).await;
    let record = h.registry.get("a").await.unwrap();
    assert_eq!(record.status, ServiceStatus::Healthy);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_flapping_restarts_once_per_outage() {
    let mut script = Vec::new();
    for _ in 0..3 {
        script.push(true);
        script.extend([false; 4]);
    }
    let checker = ScriptedChecker::new(true).script("a", &script);
    let h = harness(&["a"], checker, config(1, true)).await;
    let cancel = CancellationToken::new();

    let mut requested = 0;
    for round in 1..=script.len() as u64 {
        requested += h.scheduler.run_round(round, &cancel).await.restarts;
    }

    // Let fire-and-forget restarts finish
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(requested, 3);
    assert_eq!(h.launcher.restarts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_removed_services_are_not_probed() {
    let h = harness(&["a", "b", "c"], ScriptedChecker::new(true), config(1, false)).await;
    let cancel = CancellationToken::new();

    h.scheduler.run_round(1, &cancel).await;
    h.registry.load(vec![app("a"), app("c")]).await;

    let report = h.scheduler.run_round(2, &cancel).await;
    assert_eq!(report.probed, 2);
    assert_eq!(h.checker.calls("b"), 1);
    assert_eq!(h.checker.calls("a"), 2);

    let b = h.registry.get("b").await.unwrap();
    assert_eq!(b.status, ServiceStatus::Removed);
    assert_eq!(h.registry.get("a").await.unwrap().status, ServiceStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_discarded_when_removed_mid_round() {
    let checker = ScriptedChecker::new(false).with_latency(Duration::from_secs(2));
    let h = harness(&["a", "b"], checker, config(1, false)).await;

    let registry = h.registry.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.load(vec![app("a")]).await;
    });

    let report = h.scheduler.run_round(1, &CancellationToken::new()).await;
    assert_eq!(report.probed, 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.unhealthy, 1);

    let b = h.registry.get("b").await.unwrap();
    assert_eq!(b.status, ServiceStatus::Removed);
    assert!(b.last_checked_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rounds_never_overlap() {
    // Probes take three intervals; overlapping rounds would double the in-flight count
    let checker = ScriptedChecker::new(true).with_latency(Duration::from_secs(3));
    let h = harness(&["a", "b"], checker, config(1, false)).await;
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(h.scheduler.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(20)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(h.checker.max_in_flight.load(Ordering::SeqCst), 2);
    let rounds = h.checker.calls("a");
    assert!((4..=7).contains(&rounds), "unexpected round count {}", rounds);
    assert_eq!(h.checker.calls("a"), h.checker.calls("b"));
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_takes_effect() {
    let h = harness(&["a"], ScriptedChecker::new(true), config(1, false)).await;
    let cancel = CancellationToken::new();
    let config_tx = h.config_tx;

    let handle = tokio::spawn(h.scheduler.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(4500)).await;
    let before = h.checker.calls("a");

    config_tx.send_replace(Arc::new(DaemonConfig {
        interval: Duration::from_secs(10),
        ..config(1, false)
    }));
    tokio::time::sleep(Duration::from_secs(15)).await;
    cancel.cancel();
    handle.await.unwrap();

    // Ticks at 0..=4s, then at most two more at the new interval
    assert_eq!(before, 5);
    let after = h.checker.calls("a") - before;
    assert!((1..=2).contains(&after), "unexpected rounds after change {}", after);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_probes_abandoned_after_grace() {
    let checker = ScriptedChecker::new(true).with_latency(Duration::from_secs(60));
    let h = harness(&["a", "b"], checker, config(1, false)).await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let report = h.scheduler.run_round(1, &cancel).await;

    assert_eq!(report.abandoned, 2);
    assert_eq!(report.healthy, 0);
    // Cancelled at 1s plus the 2s grace period
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(h.registry.get("a").await.unwrap().status, ServiceStatus::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_fast_probes_finish_within_grace() {
    let checker = ScriptedChecker::new(true).with_latency(Duration::from_millis(500));
    let h = harness(&["a"], checker, config(1, false)).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.scheduler.run_round(1, &cancel).await;
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.healthy, 1);
}
