//! Journal bounds, replay and correlation tracking through the aggregator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use eventmesh_aggregator::{AggregatorConfig, EventAggregator, ReplayFilter};
use eventmesh_test_support::{ManualClock, fixed_instant};
use serde_json::json;

fn aggregator_on(clock: &Arc<ManualClock>, config: AggregatorConfig) -> EventAggregator {
    EventAggregator::with_collaborators(config, Arc::clone(clock) as _, None)
}

#[test]
fn test_journal_keeps_newest_entries_and_replays_them_in_order() {
    // Arrange
    let clock = Arc::new(ManualClock::default());
    let aggregator = aggregator_on(&clock, AggregatorConfig::default().with_journal_capacity(1000));
    aggregator.register_domain("metrics", ["sample"]);
    for n in 0..1200 {
        aggregator.publish("metrics", "sample", json!({ "n": n })).unwrap();
    }
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = aggregator.subscribe("metrics", "sample", move |envelope| {
        sink.lock().unwrap().push(envelope.payload["n"].as_u64().unwrap());
        Ok(())
    });

    // Act
    let replayed = aggregator.replay_events(&ReplayFilter::all()).unwrap();

    // Assert
    assert_eq!(aggregator.journal().len(), 1000);
    assert_eq!(replayed, 1000);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1000);
    assert_eq!(seen.first(), Some(&200));
    assert_eq!(seen.last(), Some(&1199));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_replay_neither_journals_nor_correlates() {
    // Arrange
    let clock = Arc::new(ManualClock::default());
    let aggregator = aggregator_on(&clock, AggregatorConfig::default());
    aggregator.register_domain("orders", ["created"]);
    aggregator
        .publish("orders", "created", json!({ "correlationId": "c-1" }))
        .unwrap();
    let before = aggregator.stats();

    // Act
    let replayed = aggregator.replay_events(&ReplayFilter::all()).unwrap();

    // Assert
    assert_eq!(replayed, 1);
    assert_eq!(aggregator.stats(), before);
    assert_eq!(aggregator.correlation_chain("c-1").unwrap().events.len(), 1);
}

#[test]
fn test_replay_filter_selects_domain_and_time_window() {
    // Arrange
    let clock = Arc::new(ManualClock::default());
    let aggregator = aggregator_on(&clock, AggregatorConfig::default());
    aggregator.register_domain("orders", ["created"]);
    aggregator.register_domain("billing", ["charged"]);
    for minute in 0..5 {
        aggregator.publish("orders", "created", json!({ "minute": minute })).unwrap();
        aggregator.publish("billing", "charged", json!({ "minute": minute })).unwrap();
        clock.advance(ChronoDuration::minutes(1));
    }
    let seen: Arc<Mutex<Vec<i64>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = aggregator.subscribe("orders", "created", move |envelope| {
        sink.lock().unwrap().push(envelope.payload["minute"].as_i64().unwrap());
        Ok(())
    });

    // Act
    let filter = ReplayFilter::all()
        .domain("orders")
        .after(fixed_instant())
        .before(fixed_instant() + ChronoDuration::minutes(4));
    let replayed = aggregator.replay_events(&filter).unwrap();

    // Assert
    assert_eq!(replayed, 3);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_correlation_chain_spans_domains() {
    // Arrange
    let clock = Arc::new(ManualClock::default());
    let aggregator = aggregator_on(&clock, AggregatorConfig::default());
    aggregator.register_domain("orders", ["created", "shipped"]);
    aggregator.register_domain("billing", ["charged"]);

    // Act
    aggregator
        .publish("orders", "created", json!({ "correlationId": "trace-1" }))
        .unwrap();
    clock.advance(ChronoDuration::seconds(2));
    aggregator
        .publish("billing", "charged", json!({ "correlationId": "trace-1" }))
        .unwrap();
    clock.advance(ChronoDuration::seconds(3));
    aggregator
        .publish("orders", "shipped", json!({ "correlationId": "trace-1" }))
        .unwrap();
    let chain = aggregator.correlation_chain("trace-1").unwrap();

    // Assert
    let hops: Vec<(&str, &str)> = chain
        .events
        .iter()
        .map(|link| (link.domain.as_str(), link.topic.as_str()))
        .collect();
    assert_eq!(
        hops,
        vec![("orders", "created"), ("billing", "charged"), ("orders", "shipped")]
    );
    assert_eq!(chain.domains, vec!["billing", "orders"]);
    assert_eq!(chain.duration, Duration::from_secs(5));
    assert_eq!(chain.events[2].timestamp, fixed_instant() + ChronoDuration::seconds(5));
}

#[test]
fn test_stale_correlations_are_evicted_past_the_bound() {
    // Arrange
    let clock = Arc::new(ManualClock::default());
    let aggregator = aggregator_on(&clock, AggregatorConfig::default().with_max_correlations(3));
    aggregator.register_domain("d", ["t"]);
    for id in ["a", "b", "c"] {
        aggregator.publish("d", "t", json!({ "correlationId": id })).unwrap();
    }
    clock.advance(ChronoDuration::minutes(61));

    // Act
    aggregator.publish("d", "t", json!({ "correlationId": "fresh" })).unwrap();

    // Assert
    assert_eq!(aggregator.stats().correlations_tracked, 1);
    assert!(aggregator.correlation_chain("a").is_none());
    assert!(aggregator.correlation_chain("fresh").is_some());
}
