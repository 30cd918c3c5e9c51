//! Service registry: the single source of truth for what is supervised and
//! how healthy it is.

use crate::state_machine::{self, Observation, Transition};
use crate::types::{ApplicationDescriptor, ServiceRecord, ServiceStatus};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Changes made by one [`Registry::load`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Names inserted as `Unknown`, including names re-added after removal
    pub added: Vec<String>,
    /// Names kept with an identical descriptor
    pub retained: Vec<String>,
    /// Names kept whose descriptor metadata changed
    pub changed: Vec<String>,
    /// Names newly marked `Removed`
    pub removed: Vec<String>,
    /// Names purged after staying absent for a second load
    pub purged: Vec<String>,
}

impl LoadReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.changed.is_empty()
            && self.removed.is_empty()
            && self.purged.is_empty()
    }
}

/// Concurrency-safe map from service name to [`ServiceRecord`]
#[derive(Debug, Default)]
pub struct Registry {
    services: RwLock<HashMap<String, ServiceRecord>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the descriptor set atomically.
    ///
    /// Retained names keep their status and counters, absent names become
    /// `Removed`, and records that were already `Removed` and are still
    /// absent are dropped.
    pub async fn load(&self, descriptors: Vec<ApplicationDescriptor>) -> LoadReport {
        let mut incoming: HashMap<String, ApplicationDescriptor> =
            HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if let Some(previous) = incoming.insert(descriptor.name.clone(), descriptor) {
                warn!(name = %previous.name, "Duplicate service name in load, last entry wins");
            }
        }

        let mut report = LoadReport::default();
        let mut services = self.services.write().await;

        services.retain(|name, record| {
            if incoming.contains_key(name) || record.status != ServiceStatus::Removed {
                true
            } else {
                report.purged.push(name.clone());
                false
            }
        });

        for (name, record) in services.iter_mut() {
            if !incoming.contains_key(name) {
                record.status = ServiceStatus::Removed;
                report.removed.push(name.clone());
            }
        }

        for (name, descriptor) in incoming {
            match services.get_mut(&name) {
                Some(record) if record.status != ServiceStatus::Removed => {
                    if record.descriptor == descriptor {
                        report.retained.push(name);
                    } else {
                        record.descriptor = descriptor;
                        report.changed.push(name);
                    }
                }
                _ => {
                    services.insert(name.clone(), ServiceRecord::new(descriptor));
                    report.added.push(name);
                }
            }
        }
        drop(services);

        for names in [
            &mut report.added,
            &mut report.retained,
            &mut report.changed,
            &mut report.removed,
            &mut report.purged,
        ] {
            names.sort();
        }

        info!(
            added = report.added.len(),
            retained = report.retained.len(),
            changed = report.changed.len(),
            removed = report.removed.len(),
            purged = report.purged.len(),
            "Registry loaded"
        );

        report
    }

    /// Point-in-time copy of every record, ordered by name
    pub async fn snapshot(&self) -> Vec<ServiceRecord> {
        let services = self.services.read().await;
        let mut records: Vec<ServiceRecord> = services.values().cloned().collect();
        drop(services);

        records.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        records
    }

    pub async fn get(&self, name: &str) -> Option<ServiceRecord> {
        self.services.read().await.get(name).cloned()
    }

    /// Number of records, `Removed` ones included
    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }

    /// Overwrite the status of one record.
    ///
    /// Silently ignored for unknown names and `Removed` records.
    pub async fn set_status(&self, name: &str, status: ServiceStatus) {
        let mut services = self.services.write().await;
        match services.get_mut(name) {
            Some(record) if record.status != ServiceStatus::Removed => {
                record.status = status;
            }
            _ => debug!(name, %status, "Ignoring status update"),
        }
    }

    /// Feed one final probe outcome through the state machine
    pub async fn record_outcome(
        &self,
        name: &str,
        observation: Observation,
        restart_enabled: bool,
    ) -> Option<Transition> {
        let mut services = self.services.write().await;
        let record = services.get_mut(name)?;
        state_machine::apply(record, observation, restart_enabled, Utc::now())
    }

    /// Return a `Restarting` record to `Unhealthy` after a failed restart
    pub async fn restart_failed(&self, name: &str) -> bool {
        let mut services = self.services.write().await;
        services
            .get_mut(name)
            .map(state_machine::restart_failed)
            .unwrap_or(false)
    }

    /// Number of records per status; every status is present
    pub async fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> =
            ServiceStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();

        let services = self.services.read().await;
        for record in services.values() {
            *counts.entry(record.status.as_str()).or_default() += 1;
        }
        counts
    }
}
