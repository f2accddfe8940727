//! Integration tests for the event stream: backpressure, filtered fan-out,
//! subscriber isolation, and history.

use sdn_conductor::{EventCallback, EventFilter, EventPriority, EventStream, EventStreamConfig};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn stream_with(queue: usize, history: usize) -> Arc<EventStream> {
    Arc::new(EventStream::new(EventStreamConfig {
        max_queue_size: queue,
        max_history_size: history,
        dequeue_timeout_seconds: 1,
        cleanup_interval_seconds: 60,
        auto_deactivate_failed_subscribers: true,
    }))
}

fn collecting_subscriber(sink: Arc<Mutex<Vec<u64>>>) -> EventCallback {
    Arc::new(move |event| {
        sink.lock().unwrap().push(event.sequence);
        Ok(())
    })
}

#[tokio::test]
async fn overflow_drops_exactly_the_oldest_events() {
    let stream = stream_with(8, 32);
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    stream.subscribe("sink", collecting_subscriber(Arc::clone(&seen)), EventFilter::new());

    // Publish before the consumer starts so the queue genuinely overflows.
    for i in 0..11 {
        stream.publish("burst", "c1", "system", json!({ "i": i }));
    }
    assert_eq!(stream.stats().dropped_events, 3);

    stream.clone().start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    stream.stop().await;

    // The three oldest (1, 2, 3) were dropped; the rest arrive in order.
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (4..=11).collect::<Vec<u64>>());
}

#[tokio::test]
async fn filters_select_only_matching_events() {
    let stream = stream_with(64, 64);

    let failovers: Arc<Mutex<Vec<u64>>> = Arc::default();
    stream.subscribe(
        "failover-watcher",
        collecting_subscriber(Arc::clone(&failovers)),
        EventFilter::new()
            .with_event_types(["switch_failover"])
            .with_min_priority(EventPriority::High),
    );

    let everything: Arc<Mutex<Vec<u64>>> = Arc::default();
    stream.subscribe(
        "firehose",
        collecting_subscriber(Arc::clone(&everything)),
        EventFilter::new(),
    );

    stream.clone().start();
    stream.publish("packet_in", "c1", "openflow", json!({}));
    stream.publish_with(
        "switch_failover",
        "c2",
        "system",
        json!({ "switch_id": "s1" }),
        EventPriority::High,
        Default::default(),
    );
    stream.publish_with(
        "switch_failover",
        "c2",
        "system",
        json!({ "switch_id": "s2" }),
        EventPriority::Low,
        Default::default(),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    stream.stop().await;

    assert_eq!(failovers.lock().unwrap().len(), 1);
    assert_eq!(everything.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn failing_subscriber_never_blocks_the_others() {
    let stream = stream_with(64, 64);

    stream.subscribe(
        "panicking",
        Arc::new(|event| {
            if event.event_type == "poison" {
                panic!("subscriber bug");
            }
            Ok(())
        }),
        EventFilter::new(),
    );
    let delivered = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&delivered);
    stream.subscribe(
        "healthy",
        Arc::new(move |_| {
            sink.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }),
        EventFilter::new(),
    );

    stream.clone().start();
    stream.publish("poison", "c1", "system", json!({}));
    stream.publish("after", "c1", "system", json!({}));
    tokio::time::sleep(Duration::from_millis(300)).await;
    stream.stop().await;

    assert_eq!(delivered.load(Ordering::Relaxed), 2);
    assert_eq!(stream.is_subscriber_active("panicking"), Some(false));

    // The sweep removes what the failure only deactivated.
    assert_eq!(stream.sweep_inactive(), 1);
    assert_eq!(stream.stats().subscriber_count, 1);
}

#[tokio::test]
async fn history_ring_keeps_only_the_newest() {
    let stream = stream_with(64, 4);
    stream.clone().start();
    for i in 0..10 {
        stream.publish("tick", "c1", "system", json!({ "i": i }));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    stream.stop().await;

    let recent = stream.recent(100, None);
    assert_eq!(recent.len(), 4);
    let sequences: Vec<u64> = recent.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![7, 8, 9, 10]);

    // Filtered reads scan the whole ring.
    let filter = EventFilter::new().with_custom(|e| e.sequence % 2 == 0);
    let even = stream.recent(1, Some(&filter));
    assert_eq!(even.len(), 1);
    assert_eq!(even[0].sequence, 10);
}

#[tokio::test]
async fn stats_track_aggregates_by_type_and_controller() {
    let stream = stream_with(64, 64);
    stream.clone().start();
    stream.publish("packet_in", "c1", "openflow", json!({}));
    stream.publish("packet_in", "c2", "p4runtime", json!({}));
    stream.publish("controller_registered", "c1", "system", json!({}));
    tokio::time::sleep(Duration::from_millis(300)).await;
    stream.stop().await;

    let stats = stream.stats();
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.dropped_events, 0);
    assert_eq!(stats.events_by_type["packet_in"], 2);
    assert_eq!(stats.events_by_controller["c1"], 2);
    assert_eq!(stats.events_by_source_type["system"], 1);
}
