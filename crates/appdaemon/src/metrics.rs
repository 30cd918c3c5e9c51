//! Prometheus metrics for the daemon.

use crate::types::ServiceStatus;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::collections::BTreeMap;
use std::time::Duration;

/// Labels for per-service metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: String,
}

/// Labels for probe attempt and outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    pub service: String,
    /// Result (success, failure, timeout, error for attempts; healthy, unhealthy for outcomes)
    pub result: String,
}

/// Labels for status transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub service: String,
    pub from: String,
    pub to: String,
}

/// Labels for status-count metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    pub status: String,
}

/// Labels for metrics split only by result
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// Result (ok, error)
    pub result: String,
}

/// Metrics registry with all daemon metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    // Health monitoring
    probe_attempts: Family<ResultLabels, Counter>,
    probe_duration_seconds: Histogram,
    probe_outcomes: Family<ResultLabels, Counter>,
    /// Current status (0=unknown, 1=healthy, 2=unhealthy, 3=restarting, 4=removed)
    service_status: Family<ServiceLabels, Gauge>,
    consecutive_failures: Family<ServiceLabels, Gauge>,
    status_transitions: Family<TransitionLabels, Counter>,
    services_by_status: Family<StatusLabels, Gauge>,
    restarts: Family<ResultLabels, Counter>,
    rounds: Counter,
    round_duration_seconds: Histogram,

    // Telemetry ingestion
    datagrams_received: Counter,
    datagrams_acknowledged: Counter,
    datagrams_forwarded: Family<OutcomeLabels, Counter>,

    // Control plane
    reloads: Family<OutcomeLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("appdaemon");

        let probe_attempts = Family::<ResultLabels, Counter>::default();
        registry.register(
            "probe_attempts",
            "Probe attempts by result",
            probe_attempts.clone(),
        );

        // 1ms to ~16s
        let probe_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 15));
        registry.register(
            "probe_duration_seconds",
            "Duration of a single probe attempt",
            probe_duration_seconds.clone(),
        );

        let probe_outcomes = Family::<ResultLabels, Counter>::default();
        registry.register(
            "probe_outcomes",
            "Final probe outcomes after retries",
            probe_outcomes.clone(),
        );

        let service_status = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            "service_status",
            "Current service status (0=unknown, 1=healthy, 2=unhealthy, 3=restarting, 4=removed)",
            service_status.clone(),
        );

        let consecutive_failures = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            "service_consecutive_failures",
            "Failed probes since the last success",
            consecutive_failures.clone(),
        );

        let status_transitions = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "status_transitions",
            "Service status transitions",
            status_transitions.clone(),
        );

        let services_by_status = Family::<StatusLabels, Gauge>::default();
        registry.register(
            "services",
            "Registered services by status",
            services_by_status.clone(),
        );

        let restarts = Family::<ResultLabels, Counter>::default();
        registry.register(
            "restarts",
            "Restart requests by result",
            restarts.clone(),
        );

        let rounds = Counter::default();
        registry.register("rounds", "Completed probing rounds", rounds.clone());

        let round_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 14));
        registry.register(
            "round_duration_seconds",
            "Duration of a probing round",
            round_duration_seconds.clone(),
        );

        let datagrams_received = Counter::default();
        registry.register(
            "datagrams_received",
            "Telemetry datagrams received",
            datagrams_received.clone(),
        );

        let datagrams_acknowledged = Counter::default();
        registry.register(
            "datagrams_acknowledged",
            "Telemetry datagrams acknowledged",
            datagrams_acknowledged.clone(),
        );

        let datagrams_forwarded = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "datagrams_forwarded",
            "Telemetry datagrams relayed upstream by result",
            datagrams_forwarded.clone(),
        );

        let reloads = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "reloads",
            "Configuration reloads by result",
            reloads.clone(),
        );

        Self {
            registry,
            probe_attempts,
            probe_duration_seconds,
            probe_outcomes,
            service_status,
            consecutive_failures,
            status_transitions,
            services_by_status,
            restarts,
            rounds,
            round_duration_seconds,
            datagrams_received,
            datagrams_acknowledged,
            datagrams_forwarded,
            reloads,
        }
    }

    /// Encode every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    /// Record a single probe attempt
    pub fn record_probe_attempt(&self, service: &str, result: &str, duration: Duration) {
        self.probe_attempts
            .get_or_create(&ResultLabels {
                service: service.to_string(),
                result: result.to_string(),
            })
            .inc();

        self.probe_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Record the final outcome of a probe and the resulting record state
    pub fn record_probe_outcome(
        &self,
        service: &str,
        healthy: bool,
        status: ServiceStatus,
        consecutive_failures: u32,
    ) {
        let result = if healthy { "healthy" } else { "unhealthy" };
        self.probe_outcomes
            .get_or_create(&ResultLabels {
                service: service.to_string(),
                result: result.to_string(),
            })
            .inc();

        let labels = ServiceLabels {
            service: service.to_string(),
        };
        self.service_status
            .get_or_create(&labels)
            .set(status.gauge_value());
        self.consecutive_failures
            .get_or_create(&labels)
            .set(i64::from(consecutive_failures));
    }

    pub fn record_transition(&self, service: &str, from: ServiceStatus, to: ServiceStatus) {
        self.status_transitions
            .get_or_create(&TransitionLabels {
                service: service.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
            .inc();
    }

    pub fn set_service_status(&self, service: &str, status: ServiceStatus) {
        self.service_status
            .get_or_create(&ServiceLabels {
                service: service.to_string(),
            })
            .set(status.gauge_value());
    }

    /// Drop per-service series for a service that left the registry
    pub fn forget_service(&self, service: &str) {
        let labels = ServiceLabels {
            service: service.to_string(),
        };
        self.service_status.remove(&labels);
        self.consecutive_failures.remove(&labels);
    }

    /// Update the services-by-status gauges
    pub fn update_services_by_status(&self, counts: &BTreeMap<&'static str, usize>) {
        for (status, count) in counts {
            self.services_by_status
                .get_or_create(&StatusLabels {
                    status: status.to_string(),
                })
                .set(*count as i64);
        }
    }

    pub fn record_restart(&self, service: &str, ok: bool) {
        self.restarts
            .get_or_create(&ResultLabels {
                service: service.to_string(),
                result: result_label(ok).to_string(),
            })
            .inc();
    }

    /// Record a completed probing round
    pub fn record_round(&self, duration: Duration) {
        self.rounds.inc();
        self.round_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_datagram_received(&self) {
        self.datagrams_received.inc();
    }

    pub fn record_datagram_acknowledged(&self) {
        self.datagrams_acknowledged.inc();
    }

    pub fn record_datagram_forwarded(&self, ok: bool) {
        self.datagrams_forwarded
            .get_or_create(&OutcomeLabels {
                result: result_label(ok).to_string(),
            })
            .inc();
    }

    pub fn record_reload(&self, ok: bool) {
        self.reloads
            .get_or_create(&OutcomeLabels {
                result: result_label(ok).to_string(),
            })
            .inc();
    }
}

fn result_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new();
        let text = registry.encode().unwrap();

        assert!(text.contains("# HELP appdaemon_rounds Completed probing rounds"));
        assert!(text.contains("appdaemon_datagrams_received_total 0"));
        assert!(text.ends_with("# EOF\n"));
    }

    #[test]
    fn test_record_probe_attempts() {
        let registry = MetricsRegistry::new();

        registry.record_probe_attempt("api", "success", Duration::from_millis(50));
        registry.record_probe_attempt("api", "timeout", Duration::from_millis(100));
        registry.record_probe_attempt("api", "timeout", Duration::from_millis(100));

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"appdaemon_probe_attempts_total{service="api",result="success"} 1"#));
        assert!(text.contains(r#"appdaemon_probe_attempts_total{service="api",result="timeout"} 2"#));
        assert!(text.contains("appdaemon_probe_duration_seconds_count 3"));
    }

    #[test]
    fn test_record_probe_outcome() {
        let registry = MetricsRegistry::new();
        registry.record_probe_outcome("api", false, ServiceStatus::Unhealthy, 2);

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"appdaemon_probe_outcomes_total{service="api",result="unhealthy"} 1"#));
        assert!(text.contains(r#"appdaemon_service_status{service="api"} 2"#));
        assert!(text.contains(r#"appdaemon_service_consecutive_failures{service="api"} 2"#));
    }

    #[test]
    fn test_record_transition() {
        let registry = MetricsRegistry::new();
        registry.record_transition("api", ServiceStatus::Unknown, ServiceStatus::Healthy);

        let text = registry.encode().unwrap();
        assert!(text.contains(
            r#"appdaemon_status_transitions_total{service="api",from="unknown",to="healthy"} 1"#
        ));
    }

    #[test]
    fn test_forget_service() {
        let registry = MetricsRegistry::new();
        registry.set_service_status("gone", ServiceStatus::Removed);
        assert!(registry.encode().unwrap().contains(r#"service="gone""#));

        registry.forget_service("gone");
        assert!(!registry.encode().unwrap().contains(r#"service="gone""#));
    }

    #[test]
    fn test_services_by_status() {
        let registry = MetricsRegistry::new();
        let counts = BTreeMap::from([("healthy", 3), ("unhealthy", 1)]);
        registry.update_services_by_status(&counts);

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"appdaemon_services{status="healthy"} 3"#));
        assert!(text.contains(r#"appdaemon_services{status="unhealthy"} 1"#));
    }

    #[test]
    fn test_restart_and_reload_results() {
        let registry = MetricsRegistry::new();
        registry.record_restart("api", true);
        registry.record_restart("api", false);
        registry.record_reload(false);

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"appdaemon_restarts_total{service="api",result="ok"} 1"#));
        assert!(text.contains(r#"appdaemon_restarts_total{service="api",result="error"} 1"#));
        assert!(text.contains(r#"appdaemon_reloads_total{result="error"} 1"#));
    }

    #[test]
    fn test_telemetry_and_rounds() {
        let registry = MetricsRegistry::new();
        registry.record_datagram_received();
        registry.record_datagram_acknowledged();
        registry.record_datagram_forwarded(true);
        registry.record_round(Duration::from_millis(12));

        let text = registry.encode().unwrap();
        assert!(text.contains("appdaemon_datagrams_acknowledged_total 1"));
        assert!(text.contains(r#"appdaemon_datagrams_forwarded_total{result="ok"} 1"#));
        assert!(text.contains("appdaemon_rounds_total 1"));
    }
}
