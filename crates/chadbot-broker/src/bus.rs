//! Subject-pattern event fan-out.
//!
//! Subscribers implement [`EventSink`], a small trait instead of bare
//! closures so the delivery contract (non-blocking, fallible) is explicit.
//! Delivery is at-most-once and best-effort: a failing sink drops that one
//! event for that one subscriber and the bus moves on.
//!
//! [`publish`](EventBus::publish) walks the subscription list synchronously
//! under a read lock, so events from a single publisher reach each
//! subscriber in publish order. Cross-publisher order is unspecified.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace};

use chadbot_core::event::{Event, subject_matches};

/// Delivery failure for one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The subscriber is gone (e.g. its stream closed).
    #[error("sink closed")]
    Closed,
    /// The subscriber's queue is full; the event is dropped for it.
    #[error("sink full")]
    Full,
}

/// A non-blocking event consumer.
///
/// `deliver` is called on the publisher's task and must return immediately;
/// slow consumers queue internally (plugin sinks feed the per-stream
/// outbound queue via `try_send`).
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &Event) -> Result<(), SinkError>;
}

/// Identifies one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    patterns: Vec<String>,
    sink: Arc<dyn EventSink>,
}

/// Subject-keyed pub/sub.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription for `patterns` delivering to `sink`.
    pub fn subscribe(&self, patterns: Vec<String>, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = id.0, patterns = ?patterns, "Event subscription added");
        self.subscriptions.write().push(Subscription {
            id,
            patterns,
            sink,
        });
        id
    }

    /// Appends patterns to an existing subscription. Returns false when the
    /// subscription no longer exists.
    pub fn add_patterns(&self, id: SubscriptionId, mut patterns: Vec<String>) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.patterns.append(&mut patterns);
                true
            }
            None => false,
        }
    }

    /// Removes a subscription. Safe to call twice.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().retain(|s| s.id != id);
    }

    /// Delivers `event` to every subscription with at least one matching
    /// pattern (once per subscription, however many patterns match).
    pub fn publish(&self, event: &Event) {
        let subs = self.subscriptions.read();
        for sub in subs.iter() {
            if sub
                .patterns
                .iter()
                .any(|p| subject_matches(p, &event.subject))
            {
                if let Err(e) = sub.sink.deliver(event) {
                    trace!(
                        subscription = sub.id.0,
                        subject = %event.subject,
                        error = %e,
                        "Event dropped for subscriber"
                    );
                }
            }
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chadbot_core::event::EventData;
    use parking_lot::Mutex;

    struct RecordingSink {
        subjects: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                subjects: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                subjects: Mutex::new(Vec::new()),
                fail: true,
            })
        }
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, event: &Event) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Closed);
            }
            self.subjects.lock().push(event.subject.clone());
            Ok(())
        }
    }

    fn event(subject: &str) -> Event {
        Event::new(
            subject,
            EventData::Generic {
                event_name: "t".into(),
                payload: serde_json::Value::Null,
            },
        )
    }

    #[test]
    fn fan_out_by_pattern() {
        let bus = EventBus::new();
        let wildcard_a = RecordingSink::new();
        let wildcard_b = RecordingSink::new();
        let exact = RecordingSink::new();

        bus.subscribe(vec!["chat.message.*".into()], wildcard_a.clone());
        bus.subscribe(vec!["chat.message.*".into()], wildcard_b.clone());
        bus.subscribe(vec!["chat.message.sent".into()], exact.clone());

        bus.publish(&event("chat.message.received"));
        bus.publish(&event("chat.message.sent"));

        assert_eq!(
            *wildcard_a.subjects.lock(),
            vec!["chat.message.received", "chat.message.sent"]
        );
        assert_eq!(
            *wildcard_b.subjects.lock(),
            vec!["chat.message.received", "chat.message.sent"]
        );
        assert_eq!(*exact.subjects.lock(), vec!["chat.message.sent"]);
    }

    #[test]
    fn one_delivery_per_subscription_even_with_overlapping_patterns() {
        let bus = EventBus::new();
        let sink = RecordingSink::new();
        bus.subscribe(
            vec!["chat.#".into(), "chat.message.*".into()],
            sink.clone(),
        );

        bus.publish(&event("chat.message.sent"));
        assert_eq!(sink.subjects.lock().len(), 1);
    }

    #[test]
    fn failing_sink_does_not_stop_fan_out() {
        let bus = EventBus::new();
        let dead = RecordingSink::failing();
        let live = RecordingSink::new();
        bus.subscribe(vec!["a.*".into()], dead);
        bus.subscribe(vec!["a.*".into()], live.clone());

        bus.publish(&event("a.b"));
        assert_eq!(*live.subjects.lock(), vec!["a.b"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sink = RecordingSink::new();
        let id = bus.subscribe(vec!["a".into()], sink.clone());
        bus.publish(&event("a"));
        bus.unsubscribe(id);
        bus.publish(&event("a"));
        assert_eq!(sink.subjects.lock().len(), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn add_patterns_extends_subscription() {
        let bus = EventBus::new();
        let sink = RecordingSink::new();
        let id = bus.subscribe(vec!["a".into()], sink.clone());
        assert!(bus.add_patterns(id, vec!["b".into()]));

        bus.publish(&event("b"));
        assert_eq!(*sink.subjects.lock(), vec!["b"]);

        bus.unsubscribe(id);
        assert!(!bus.add_patterns(id, vec!["c".into()]));
    }
}
