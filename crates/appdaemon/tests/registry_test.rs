//! Registry behavior under concurrent writers and reloads

use appdaemon::state_machine::Observation;
use appdaemon::{ApplicationDescriptor, Registry, ServiceStatus};
use std::sync::Arc;

fn app(name: &str) -> ApplicationDescriptor {
    ApplicationDescriptor {
        name: name.to_string(),
        service_url: format!("http://{}.local", name),
        health_check_path: "/healthcheck".to_string(),
        runtime: String::new(),
        launch_path: String::new(),
        launch_args: String::new(),
        port: 8080,
    }
}

fn apps(names: &[&str]) -> Vec<ApplicationDescriptor> {
    names.iter().map(|n| app(n)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_outcomes_are_all_applied() {
    let registry = Arc::new(Registry::new());
    let names: Vec<String> = (0..16).map(|i| format!("svc-{:02}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    registry.load(apps(&refs)).await;

    let mut handles = Vec::new();
    for name in &names {
        for _ in 0..25 {
            let registry = registry.clone();
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                registry.record_outcome(&name, Observation::Failure, false).await
            }));
        }
    }

    // Readers run alongside the writers and never see a torn record
    let reader = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                for record in registry.snapshot().await {
                    if record.consecutive_failures > 0 {
                        assert_eq!(record.status, ServiceStatus::Unhealthy);
                    }
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let mut transitions = 0;
    for handle in handles {
        if handle.await.unwrap().is_some_and(|t| t.changed()) {
            transitions += 1;
        }
    }
    reader.await.unwrap();

    // One Unknown -> Unhealthy transition per service
    assert_eq!(transitions, names.len());
    for record in registry.snapshot().await {
        assert_eq!(record.consecutive_failures, 25);
        assert_eq!(record.status, ServiceStatus::Unhealthy);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reload_during_outcomes_keeps_retained_records() {
    let registry = Arc::new(Registry::new());
    registry.load(apps(&["a", "b", "c"])).await;

    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                registry.record_outcome("a", Observation::Failure, false).await;
                registry.record_outcome("b", Observation::Failure, false).await;
            }
        })
    };

    registry.load(apps(&["a", "c", "d"])).await;
    writer.await.unwrap();

    let a = registry.get("a").await.unwrap();
    assert_eq!(a.consecutive_failures, 100);
    assert_eq!(a.status, ServiceStatus::Unhealthy);

    // Outcomes for a removed service are discarded
    let b = registry.get("b").await.unwrap();
    assert_eq!(b.status, ServiceStatus::Removed);
    assert!(registry.record_outcome("b", Observation::Success, false).await.is_none());
    assert_eq!(registry.get("b").await.unwrap().status, ServiceStatus::Removed);

    assert_eq!(registry.get("d").await.unwrap().status, ServiceStatus::Unknown);
}

#[tokio::test]
async fn test_removed_then_readded_starts_fresh() {
    let registry = Registry::new();
    registry.load(apps(&["a", "b"])).await;
    registry.record_outcome("b", Observation::Failure, false).await;

    let report = registry.load(apps(&["a"])).await;
    assert_eq!(report.removed, vec!["b"]);

    let report = registry.load(apps(&["a", "b"])).await;
    assert_eq!(report.added, vec!["b"]);
    assert_eq!(report.retained, vec!["a"]);

    let b = registry.get("b").await.unwrap();
    assert_eq!(b.status, ServiceStatus::Unknown);
    assert_eq!(b.consecutive_failures, 0);
    assert!(b.last_checked_at.is_none());
}

#[tokio::test]
async fn test_status_counts_track_transitions() {
    let registry = Registry::new();
    registry.load(apps(&["a", "b", "c", "d"])).await;

    registry.record_outcome("a", Observation::Success, true).await;
    registry.record_outcome("b", Observation::Failure, true).await;
    registry.record_outcome("c", Observation::Failure, true).await;
    registry.record_outcome("c", Observation::Failure, true).await;
    registry.load(apps(&["a", "b", "c"])).await;

    let counts = registry.status_counts().await;
    assert_eq!(counts["healthy"], 1);
    assert_eq!(counts["unhealthy"], 1);
    assert_eq!(counts["restarting"], 1);
    assert_eq!(counts["removed"], 1);
    assert_eq!(counts["unknown"], 0);
}
