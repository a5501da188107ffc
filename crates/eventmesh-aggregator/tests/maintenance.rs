//! Maintenance loop: saga pruning, leak checks and stats snapshots.

use std::sync::Arc;
use std::time::Duration;

use eventmesh_aggregator::{
    AggregatorConfig, EventAggregator, STATS_KEY, STATS_NAMESPACE, SagaDefinition,
};
use eventmesh_bus::BusConfig;
use eventmesh_core::clock::system_clock;
use eventmesh_test_support::{FailingStateStore, RecordingStateStore};
use serde_json::json;

fn with_store(store: Arc<RecordingStateStore>) -> EventAggregator {
    EventAggregator::with_collaborators(AggregatorConfig::default(), system_clock(), Some(store))
}

#[tokio::test]
async fn test_run_maintenance_pushes_stats_snapshot() {
    // Arrange
    let store = Arc::new(RecordingStateStore::new());
    let aggregator = with_store(Arc::clone(&store));
    aggregator.register_domain("orders", ["created"]);
    aggregator.register_saga(SagaDefinition::new("noop"));
    aggregator.publish("orders", "created", json!({})).unwrap();

    // Act
    let report = aggregator.run_maintenance().await;

    // Assert
    assert!(report.persisted);
    assert_eq!(report.pruned_sagas, 0);
    let snapshot = store.latest(STATS_NAMESPACE, STATS_KEY).unwrap();
    assert_eq!(snapshot["eventsAggregated"], 1);
    assert_eq!(snapshot["registeredSagas"], 1);
    assert_eq!(snapshot["journalSize"], 1);
}

#[tokio::test]
async fn test_store_failure_is_reported_not_raised() {
    let aggregator = EventAggregator::with_collaborators(
        AggregatorConfig::default(),
        system_clock(),
        Some(Arc::new(FailingStateStore)),
    );

    let report = aggregator.run_maintenance().await;

    assert!(!report.persisted);
}

#[tokio::test]
async fn test_maintenance_counts_leaking_domain_topics() {
    // Arrange
    let config = AggregatorConfig {
        bus: BusConfig::default().with_max_listeners(2),
        ..AggregatorConfig::default()
    };
    let aggregator = EventAggregator::new(config);
    let _subs: Vec<_> = (0..3)
        .map(|_| aggregator.subscribe("orders", "created", |_| Ok(())))
        .collect();

    // Act
    let report = aggregator.run_maintenance().await;

    // Assert
    assert_eq!(report.leaking_topics, 1);
    assert!(!report.persisted, "no store attached");
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_interval_runs_until_shutdown() {
    // Arrange
    let store = Arc::new(RecordingStateStore::new());
    let aggregator = with_store(Arc::clone(&store));
    aggregator.start_maintenance().unwrap();

    // Act
    tokio::time::sleep(Duration::from_secs(125)).await;
    let while_running = store.writes().len();
    aggregator.shutdown();
    tokio::time::sleep(Duration::from_secs(300)).await;

    // Assert
    assert_eq!(while_running, 2);
    assert_eq!(store.writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restarting_maintenance_keeps_the_running_schedule() {
    // Arrange
    let store = Arc::new(RecordingStateStore::new());
    let aggregator = with_store(Arc::clone(&store));
    aggregator.start_maintenance().unwrap();
    tokio::time::sleep(Duration::from_secs(90)).await;

    // Act
    aggregator.start_maintenance().unwrap();
    tokio::time::sleep(Duration::from_secs(35)).await;

    // Assert
    assert_eq!(store.writes().len(), 2, "ticks at 60 s and 120 s, not rescheduled");
    aggregator.shutdown();
}
