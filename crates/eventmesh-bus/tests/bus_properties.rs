//! Dispatch-contract tests for the topic bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventmesh_bus::{BusConfig, BusError, ListenerResult, TopicBus};

type Log = Arc<Mutex<Vec<String>>>;

fn new_bus() -> TopicBus<u32> {
    TopicBus::new("props", BusConfig::default())
}

fn record(log: Log, label: String) -> impl Fn(&u32) -> ListenerResult {
    move |_: &u32| {
        log.lock().unwrap().push(label.clone());
        Ok(())
    }
}

#[test]
fn test_exact_listeners_fire_in_order_before_any_wildcard() {
    // Arrange
    let bus = new_bus();
    let log: Log = Arc::default();
    // Interleave registrations so ordering cannot come from insertion alone.
    let mut subs = Vec::new();
    for i in 0..3 {
        subs.push(bus.subscribe("orders.*", record(Arc::clone(&log), format!("wild-{i}"))));
        subs.push(bus.subscribe("orders.created", record(Arc::clone(&log), format!("exact-{i}"))));
    }
    subs.push(bus.subscribe("*", record(Arc::clone(&log), "global".to_owned())));

    // Act
    bus.publish("orders.created", 1).unwrap();

    // Assert
    assert_eq!(
        *log.lock().unwrap(),
        vec!["exact-0", "exact-1", "exact-2", "wild-0", "wild-1", "wild-2", "global"]
    );
}

#[test]
fn test_unsubscribed_listener_is_never_invoked_again() {
    // Arrange
    let bus = new_bus();
    let log: Log = Arc::default();
    let first = bus.subscribe("tick", record(Arc::clone(&log), "first".to_owned()));
    let _second = bus.subscribe("tick", record(Arc::clone(&log), "second".to_owned()));
    bus.publish("tick", 1).unwrap();

    // Act
    assert!(first.unsubscribe());
    bus.publish("tick", 2).unwrap();

    // Assert
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "second"]);
    assert_eq!(bus.listener_count("tick"), 1);
}

#[test]
fn test_unsubscribe_of_unknown_registration_is_noop() {
    // Arrange
    let bus = new_bus();
    let sub = bus.subscribe("tick", |_: &u32| Ok(()));
    let id = sub.id();
    assert!(sub.unsubscribe());

    // Act
    let again = bus.unsubscribe("tick", id);

    // Assert
    assert!(!again);
    assert_eq!(bus.metrics().listeners_detached, 1);
}

#[test]
fn test_wildcard_matching_is_asymmetric() {
    // Arrange
    let bus = new_bus();
    let parent = Arc::new(AtomicUsize::new(0));
    let child = Arc::new(AtomicUsize::new(0));
    let parent_hits = Arc::clone(&parent);
    let child_hits = Arc::clone(&child);
    let _a = bus.subscribe("a.*", move |_: &u32| {
        parent_hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let _ab = bus.subscribe("a.b.*", move |_: &u32| {
        child_hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    // Act
    bus.publish("a.b", 1).unwrap();
    bus.publish("a.b.c", 2).unwrap();

    // Assert
    assert_eq!(parent.load(Ordering::SeqCst), 2, "a.* fires for a.b and a.b.c");
    assert_eq!(child.load(Ordering::SeqCst), 1, "a.b.* fires for a.b.c only");
}

#[test]
fn test_listener_over_threshold_is_reported_by_leak_check() {
    // Arrange
    let bus = new_bus();
    let subs: Vec<_> = (0..51).map(|_| bus.subscribe("hot", |_: &u32| Ok(()))).collect();
    let before = bus.metrics().leak_detections;

    // Act
    let report = bus.check_for_leaks();

    // Assert
    assert_eq!(subs.len(), 51);
    assert!(before >= 1, "registering #51 flags the leak immediately");
    assert!(bus.metrics().leak_detections > before);
    assert_eq!(report.over_threshold.len(), 1);
    assert_eq!(report.over_threshold[0].listeners, 51);
    assert_eq!(bus.listener_count("hot"), 51, "leak check must not detach listeners");
}

#[test]
fn test_fifty_listeners_do_not_trigger_leak() {
    // Arrange
    let bus = new_bus();
    let _subs: Vec<_> = (0..50).map(|_| bus.subscribe("warm", |_: &u32| Ok(()))).collect();

    // Act
    let report = bus.check_for_leaks();

    // Assert
    assert!(report.is_clean());
    assert_eq!(bus.metrics().leak_detections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_leak_monitor_runs_on_its_interval() {
    // Arrange
    let bus = new_bus();
    let _subs: Vec<_> = (0..51).map(|_| bus.subscribe("hot", |_: &u32| Ok(()))).collect();
    let after_subscribe = bus.metrics().leak_detections;
    bus.start_leak_monitor().unwrap();

    // Act
    tokio::time::sleep(Duration::from_secs(125)).await;

    // Assert
    assert_eq!(bus.metrics().leak_detections, after_subscribe + 2);
    bus.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_times_out_and_removes_its_listener() {
    // Arrange
    let bus = new_bus();
    let started = tokio::time::Instant::now();

    // Act
    let outcome = bus.wait_for("never-emitted", Duration::from_millis(50)).await;

    // Assert
    match outcome {
        Err(BusError::Timeout { topic, timeout }) => {
            assert_eq!(topic, "never-emitted");
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(bus.listener_count("never-emitted"), 0);
    let delivered = bus.publish("never-emitted", 1).unwrap();
    assert!(!delivered, "no late invocation of the abandoned waiter");
}

#[tokio::test]
async fn test_wait_for_resolves_with_next_message() {
    // Arrange
    let bus = new_bus();
    let publisher = bus.clone();
    let waiter = tokio::spawn(async move { bus.wait_for("ready", Duration::from_secs(5)).await });
    tokio::task::yield_now().await;

    // Act
    publisher.publish("ready", 99).unwrap();

    // Assert
    assert_eq!(waiter.await.unwrap().unwrap(), 99);
    assert_eq!(publisher.listener_count("ready"), 0);
}

#[tokio::test]
async fn test_async_listeners_run_after_publish_returns() {
    // Arrange
    let bus = new_bus();
    let log: Log = Arc::default();
    let async_log = Arc::clone(&log);
    let _async = bus.subscribe_async("jobs", move |n: u32| {
        let log = Arc::clone(&async_log);
        async move {
            log.lock().unwrap().push(format!("async-{n}"));
            ListenerResult::Ok(())
        }
    });
    let _sync = bus.subscribe("jobs", record(Arc::clone(&log), "sync".to_owned()));

    // Act
    let had_exact = bus.publish("jobs", 5).unwrap();
    let immediately = log.lock().unwrap().clone();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // Assert
    assert!(had_exact);
    assert_eq!(immediately, vec!["sync"]);
    assert_eq!(*log.lock().unwrap(), vec!["sync", "async-5"]);
}

#[test]
fn test_metrics_count_emits_and_attachments() {
    // Arrange
    let bus = new_bus();
    let sub = bus.subscribe("a", |_: &u32| Ok(()));
    let _wild = bus.subscribe("a.*", |_: &u32| Ok(()));

    // Act
    bus.publish("a", 1).unwrap();
    bus.publish("a.b", 2).unwrap();
    sub.unsubscribe();

    // Assert
    let metrics = bus.metrics();
    assert_eq!(metrics.events_emitted, 2);
    assert_eq!(metrics.listeners_attached, 2);
    assert_eq!(metrics.listeners_detached, 1);
    assert_eq!(metrics.active_listeners, 1);
    assert_eq!(metrics.dispatch_errors, 0);
}
