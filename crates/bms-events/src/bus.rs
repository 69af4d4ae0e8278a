use crate::pattern::pattern_matches;
use crate::Event;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Listener callback. Runs on the subscription's drainer task; must not
/// assume any ordering relative to other subscriptions.
pub type Listener = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    queue: mpsc::UnboundedSender<Event>,
}

/// The bus. Cheap to clone; one instance per process.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscriptions: RwLock<Vec<Subscription>>,
    /// Events enqueued but whose listener call has not yet returned.
    pending: AtomicUsize,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(Vec::new()),
                pending: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener for a wildcard pattern. Spawns the
    /// subscription's drainer task; events enqueued to it are delivered
    /// in dispatch order, exactly once, one at a time.
    pub fn subscribe(&self, pattern: impl Into<String>, listener: Listener) -> SubscriptionId {
        let pattern = pattern.into();
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listener(event).await;
                inner.pending.fetch_sub(1, Ordering::SeqCst);
            }
        });

        self.inner.subscriptions.write().unwrap().push(Subscription {
            id,
            pattern,
            queue: tx,
        });
        id
    }

    /// Drop a subscription; its drainer exits after the queue empties.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .subscriptions
            .write()
            .unwrap()
            .retain(|s| s.id != id);
    }

    /// Enqueue the event to every matching subscription and return.
    /// Never blocks on listener work.
    pub fn dispatch(&self, event: Event) {
        let subs = self.inner.subscriptions.read().unwrap();
        for sub in subs.iter() {
            if pattern_matches(&sub.pattern, &event.event_type, &event.source) {
                self.inner.pending.fetch_add(1, Ordering::SeqCst);
                if sub.queue.send(event.clone()).is_err() {
                    // Drainer is gone; the event will never be delivered.
                    self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                    warn!(pattern = %sub.pattern, "dropping event for dead subscription");
                }
            }
        }
    }

    /// Events enqueued whose listener has not yet returned.
    pub fn pending_events(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().unwrap().len()
    }

    /// Poll until every previously dispatched event has been fully
    /// processed, or the timeout passes. Returns whether the bus drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending_events() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collector() -> (Listener, Arc<Mutex<Vec<String>>>) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |ev: Event| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(ev.event_type);
            })
        });
        (listener, seen)
    }

    #[tokio::test]
    async fn delivery_is_fifo_per_listener() {
        let bus = EventBus::new();
        let (listener, seen) = collector();
        bus.subscribe("pull.*", listener);

        for i in 0..50 {
            bus.dispatch(Event::signal(format!("pull.step_{i:02}"), "accounts"));
        }
        assert!(bus.wait_for_drain(Duration::from_secs(5)).await);

        let got = seen.lock().unwrap().clone();
        assert_eq!(got.len(), 50);
        let mut sorted = got.clone();
        sorted.sort();
        assert_eq!(got, sorted, "delivery order must equal dispatch order");
    }

    #[tokio::test]
    async fn wildcard_routing_matches_s5_table() {
        let bus = EventBus::new();
        let (l1, seen1) = collector();
        let (l2, seen2) = collector();
        let (l3, seen3) = collector();
        bus.subscribe("pull.*", l1);
        bus.subscribe("*.accounts", l2);
        bus.subscribe("*", l3);

        bus.dispatch(Event::signal("pull.complete", "accounts"));
        bus.dispatch(Event::signal("push.start", "accounts"));
        assert!(bus.wait_for_drain(Duration::from_secs(5)).await);

        assert_eq!(seen1.lock().unwrap().as_slice(), ["pull.complete"]);
        assert_eq!(
            seen2.lock().unwrap().as_slice(),
            ["pull.complete", "push.start"]
        );
        assert_eq!(
            seen3.lock().unwrap().as_slice(),
            ["pull.complete", "push.start"]
        );
    }

    #[tokio::test]
    async fn drain_times_out_on_stuck_listener() {
        let bus = EventBus::new();
        let listener: Listener = Arc::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
        });
        bus.subscribe("*", listener);
        bus.dispatch(Event::signal("slow.event", "test"));

        assert!(!bus.wait_for_drain(Duration::from_millis(100)).await);
        assert_eq!(bus.pending_events(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (listener, seen) = collector();
        let id = bus.subscribe("*", listener);
        bus.dispatch(Event::signal("one", "t"));
        assert!(bus.wait_for_drain(Duration::from_secs(1)).await);
        bus.unsubscribe(id);
        bus.dispatch(Event::signal("two", "t"));
        assert!(bus.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
