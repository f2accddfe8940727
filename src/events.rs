//! Centralized event stream: the single aggregation point for engine and
//! backend events. Owns a bounded queue with drop-oldest overflow, a
//! fixed-size history ring, and a filtered subscriber registry served by a
//! single consumer task.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::EventStreamConfig;

/// Event priority; filters compare with `>=` on the numeric order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Medium,
    High,
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Low
    }
}

/// Immutable event record with a process-wide monotonic sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub source_controller: String,
    pub source_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub priority: EventPriority,
    pub metadata: HashMap<String, Value>,
}

/// Conjunction of optional constraints; an empty constraint is a wildcard.
#[derive(Clone, Default)]
pub struct EventFilter {
    pub event_types: HashSet<String>,
    pub controller_ids: HashSet<String>,
    pub source_types: HashSet<String>,
    pub min_priority: EventPriority,
    custom: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter")
            .field("event_types", &self.event_types)
            .field("controller_ids", &self.controller_ids)
            .field("source_types", &self.source_types)
            .field("min_priority", &self.min_priority)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_controllers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.controller_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = priority;
        self
    }

    pub fn with_custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(predicate));
        self
    }

    /// AND of all set constraints; unset constraints always match.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.controller_ids.is_empty()
            && !self.controller_ids.contains(&event.source_controller)
        {
            return false;
        }
        if !self.source_types.is_empty() && !self.source_types.contains(&event.source_type) {
            return false;
        }
        if event.priority < self.min_priority {
            return false;
        }
        if let Some(custom) = &self.custom {
            if !custom(event) {
                return false;
            }
        }
        true
    }
}

/// Subscriber callback; an `Err` counts as a delivery failure.
pub type EventCallback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    callback: EventCallback,
    filter: EventFilter,
    created_at: DateTime<Utc>,
    delivered_events: u64,
    active: bool,
}

/// Running totals reported by `EventStream::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EventStreamStats {
    pub running: bool,
    pub uptime_seconds: f64,
    pub queue_depth: usize,
    pub history_size: usize,
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub events_by_controller: HashMap<String, u64>,
    pub events_by_source_type: HashMap<String, u64>,
    pub dropped_events: u64,
    pub subscriber_count: usize,
    pub events_per_second: f64,
}

#[derive(Default)]
struct Aggregates {
    total_events: u64,
    by_type: HashMap<String, u64>,
    by_controller: HashMap<String, u64>,
    by_source_type: HashMap<String, u64>,
}

/// Centralized event streaming system.
///
/// A single consumer task dequeues events in sequence order, updates
/// aggregates, appends to history, and fans out synchronously to every
/// active subscriber whose filter matches. A misbehaving subscriber is
/// deactivated (policy-controlled) and later removed by the periodic sweep;
/// it can never stop delivery to the others.
pub struct EventStream {
    config: EventStreamConfig,
    queue: Mutex<VecDeque<Event>>,
    queue_notify: Notify,
    shutdown: Notify,
    history: Mutex<VecDeque<Event>>,
    sequence: AtomicU64,
    subscribers: DashMap<String, Subscriber>,
    aggregates: Mutex<Aggregates>,
    dropped_events: AtomicU64,
    started_at: DateTime<Utc>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventStream {
    pub fn new(config: EventStreamConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(config.max_queue_size)),
            queue_notify: Notify::new(),
            shutdown: Notify::new(),
            history: Mutex::new(VecDeque::with_capacity(config.max_history_size)),
            sequence: AtomicU64::new(0),
            subscribers: DashMap::new(),
            aggregates: Mutex::new(Aggregates::default()),
            dropped_events: AtomicU64::new(0),
            started_at: Utc::now(),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Start the consumer loop and the inactive-subscriber sweep. Call as
    /// `stream.clone().start()` to keep the handle.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Event stream already running");
            return;
        }
        info!("Starting event stream processor");

        let consumer = Arc::clone(&self);
        let sweep = Arc::clone(&self);
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(async move {
            consumer.run_consumer().await;
        }));
        tasks.push(tokio::spawn(async move {
            sweep.run_cleanup().await;
        }));
    }

    /// Stop both tasks and await their termination. The consumer observes
    /// the stop request within one dequeue timeout.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping event stream processor");
        self.queue_notify.notify_waiters();
        self.shutdown.notify_waiters();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Event stream task terminated abnormally");
            }
        }
        info!("Event stream stopped");
    }

    /// Publish an event at low priority with no metadata.
    pub fn publish(
        &self,
        event_type: &str,
        source_controller: &str,
        source_type: &str,
        data: Value,
    ) -> u64 {
        self.publish_with(
            event_type,
            source_controller,
            source_type,
            data,
            EventPriority::Low,
            HashMap::new(),
        )
    }

    /// Publish an event. Assigns the next sequence number and enqueues;
    /// when the queue is full the oldest queued event is dropped and
    /// counted. Returns the assigned sequence number.
    pub fn publish_with(
        &self,
        event_type: &str,
        source_controller: &str,
        source_type: &str,
        data: Value,
        priority: EventPriority,
        metadata: HashMap<String, Value>,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            event_type: event_type.to_string(),
            source_controller: source_controller.to_string(),
            source_type: source_type.to_string(),
            data,
            timestamp: Utc::now(),
            sequence,
            priority,
            metadata,
        };

        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.config.max_queue_size {
                queue.pop_front();
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                counter!("conductor_events_dropped_total", 1);
            }
            queue.push_back(event);
            gauge!("conductor_event_queue_depth", queue.len() as f64);
        }
        counter!("conductor_events_published_total", 1);
        self.queue_notify.notify_one();
        sequence
    }

    /// Register a subscriber. Ids are caller-chosen and must be unique;
    /// a duplicate id is rejected.
    pub fn subscribe(&self, subscriber_id: &str, callback: EventCallback, filter: EventFilter) -> bool {
        match self.subscribers.entry(subscriber_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(subscriber_id = %subscriber_id, "Subscriber already exists");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Subscriber {
                    callback,
                    filter,
                    created_at: Utc::now(),
                    delivered_events: 0,
                    active: true,
                });
                info!(subscriber_id = %subscriber_id, "Added event subscriber");
                gauge!("conductor_event_subscribers", self.subscribers.len() as f64);
                true
            }
        }
    }

    /// Remove a subscriber; a no-op when the id is unknown.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        let removed = self.subscribers.remove(subscriber_id).is_some();
        if removed {
            info!(subscriber_id = %subscriber_id, "Removed event subscriber");
            gauge!("conductor_event_subscribers", self.subscribers.len() as f64);
        } else {
            debug!(subscriber_id = %subscriber_id, "Unsubscribe for unknown subscriber");
        }
        removed
    }

    /// Whether a subscriber is registered and still active.
    pub fn is_subscriber_active(&self, subscriber_id: &str) -> Option<bool> {
        self.subscribers.get(subscriber_id).map(|s| s.active)
    }

    /// Events delivered to one subscriber so far.
    pub fn delivered_count(&self, subscriber_id: &str) -> Option<u64> {
        self.subscribers
            .get(subscriber_id)
            .map(|s| s.delivered_events)
    }

    /// Up to `count` most-recent events from the history ring, oldest
    /// first, optionally filtered. Does not consume the main queue.
    pub fn recent(&self, count: usize, filter: Option<&EventFilter>) -> Vec<Event> {
        let history = self.history.lock().unwrap();
        let matching: Vec<Event> = history
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(e)))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(count);
        matching.into_iter().skip(skip).collect()
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> EventStreamStats {
        let uptime = (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        let aggregates = self.aggregates.lock().unwrap();
        EventStreamStats {
            running: self.running.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            queue_depth: self.queue.lock().unwrap().len(),
            history_size: self.history.lock().unwrap().len(),
            total_events: aggregates.total_events,
            events_by_type: aggregates.by_type.clone(),
            events_by_controller: aggregates.by_controller.clone(),
            events_by_source_type: aggregates.by_source_type.clone(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            subscriber_count: self.subscribers.len(),
            events_per_second: aggregates.total_events as f64 / uptime.max(1.0),
        }
    }

    /// Remove inactive subscribers. Normally driven by the periodic sweep
    /// task; exposed so adapters can force a sweep.
    pub fn sweep_inactive(&self) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|id, subscriber| {
            if !subscriber.active {
                info!(subscriber_id = %id, "Removed inactive subscriber");
            }
            subscriber.active
        });
        let removed = before - self.subscribers.len();
        if removed > 0 {
            gauge!("conductor_event_subscribers", self.subscribers.len() as f64);
        }
        removed
    }

    async fn run_consumer(self: Arc<Self>) {
        info!("Event processor started");
        while self.running.load(Ordering::Relaxed) {
            if let Some(event) = self.dequeue_one().await {
                self.process_event(event);
            }
        }
        info!("Event processor stopped");
    }

    /// Dequeue one event, waiting at most one dequeue timeout so a stop
    /// request is observed promptly.
    async fn dequeue_one(&self) -> Option<Event> {
        if let Some(event) = self.queue.lock().unwrap().pop_front() {
            return Some(event);
        }
        let _ = time::timeout(
            self.config.dequeue_timeout(),
            self.queue_notify.notified(),
        )
        .await;
        self.queue.lock().unwrap().pop_front()
    }

    fn process_event(&self, event: Event) {
        {
            let mut aggregates = self.aggregates.lock().unwrap();
            aggregates.total_events += 1;
            *aggregates
                .by_type
                .entry(event.event_type.clone())
                .or_default() += 1;
            *aggregates
                .by_controller
                .entry(event.source_controller.clone())
                .or_default() += 1;
            *aggregates
                .by_source_type
                .entry(event.source_type.clone())
                .or_default() += 1;
        }

        {
            let mut history = self.history.lock().unwrap();
            if history.len() >= self.config.max_history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        self.distribute(&event);
    }

    /// Fan out to every active subscriber whose filter matches. Callback
    /// errors and panics are contained per subscriber.
    fn distribute(&self, event: &Event) {
        let targets: Vec<(String, EventCallback)> = self
            .subscribers
            .iter()
            .filter(|entry| entry.active && entry.filter.matches(event))
            .map(|entry| (entry.key().clone(), entry.callback.clone()))
            .collect();

        for (subscriber_id, callback) in targets {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            match outcome {
                Ok(Ok(())) => {
                    if let Some(mut subscriber) = self.subscribers.get_mut(&subscriber_id) {
                        subscriber.delivered_events += 1;
                    }
                }
                Ok(Err(e)) => {
                    error!(
                        subscriber_id = %subscriber_id,
                        error = %e,
                        "Subscriber callback failed"
                    );
                    self.deactivate_failed(&subscriber_id);
                }
                Err(_) => {
                    error!(subscriber_id = %subscriber_id, "Subscriber callback panicked");
                    self.deactivate_failed(&subscriber_id);
                }
            }
        }
    }

    fn deactivate_failed(&self, subscriber_id: &str) {
        if !self.config.auto_deactivate_failed_subscribers {
            return;
        }
        if let Some(mut subscriber) = self.subscribers.get_mut(subscriber_id) {
            subscriber.active = false;
            warn!(subscriber_id = %subscriber_id, "Deactivated failing subscriber");
        }
    }

    async fn run_cleanup(self: Arc<Self>) {
        let interval = self.config.cleanup_interval();
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    let removed = self.sweep_inactive();
                    if removed > 0 {
                        debug!(removed, "Subscriber sweep removed inactive subscribers");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }
    }

    /// Subscriber registration time, mainly for diagnostics.
    pub fn subscriber_since(&self, subscriber_id: &str) -> Option<DateTime<Utc>> {
        self.subscribers.get(subscriber_id).map(|s| s.created_at)
    }
}
