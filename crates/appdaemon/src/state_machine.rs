//! Failure/recovery state machine.
//!
//! Transitions, driven only by final probe outcomes:
//! - Unknown | Healthy | Unhealthy | Restarting + success → Healthy
//! - Unknown | Healthy + failure → Unhealthy
//! - Unhealthy + failure → Restarting when restarts are enabled and the
//!   latch is armed, Unhealthy otherwise
//! - Restarting + failure → Unhealthy
//! - Removed ignores everything
//!
//! The restart latch is armed by every success and consumed by a restart
//! request, so a service that stays down is restarted once per entry into
//! `Unhealthy`.

use crate::types::{ServiceRecord, ServiceStatus};
use chrono::{DateTime, Utc};
use healthcheck::ProbeOutcome;

/// Final result of one probe, as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Success,
    Failure,
}

impl From<&ProbeOutcome> for Observation {
    fn from(outcome: &ProbeOutcome) -> Self {
        if outcome.is_healthy() {
            Observation::Success
        } else {
            Observation::Failure
        }
    }
}

/// Effect of applying one observation to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ServiceStatus,
    pub to: ServiceStatus,
    pub consecutive_failures: u32,
    /// The caller must ask the launcher to restart the service
    pub restart_requested: bool,
}

impl Transition {
    /// Whether the status changed
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Apply `observation` to `record`.
///
/// Returns `None` for removed records, which accept no further outcomes.
pub fn apply(
    record: &mut ServiceRecord,
    observation: Observation,
    restart_enabled: bool,
    now: DateTime<Utc>,
) -> Option<Transition> {
    let from = record.status;
    if from == ServiceStatus::Removed {
        return None;
    }

    let mut restart_requested = false;

    let to = match observation {
        Observation::Success => {
            record.consecutive_failures = 0;
            record.restart_armed = true;
            ServiceStatus::Healthy
        }
        Observation::Failure => {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            match from {
                ServiceStatus::Unhealthy if restart_enabled && record.restart_armed => {
                    record.restart_armed = false;
                    restart_requested = true;
                    ServiceStatus::Restarting
                }
                _ => ServiceStatus::Unhealthy,
            }
        }
    };

    record.status = to;
    record.last_checked_at = Some(now);

    Some(Transition {
        from,
        to,
        consecutive_failures: record.consecutive_failures,
        restart_requested,
    })
}

/// Move a record back to `Unhealthy` after the launcher failed to restart it.
///
/// The latch stays disarmed; only a later success re-arms it.
pub fn restart_failed(record: &mut ServiceRecord) -> bool {
    if record.status == ServiceStatus::Restarting {
        record.status = ServiceStatus::Unhealthy;
        true
    } else {
        false
    }
}
