use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::Frame;

/// Frames buffered per subscriber before the oldest are discarded.
pub const SUBSCRIBER_QUEUE: usize = 64;

#[derive(Debug, Default, Clone)]
struct SubscriberStats {
    dropped: u64,
}

/// Single-producer fan-out to all WebSocket subscribers. Publishing never
/// blocks: each subscriber owns a bounded queue and a slow consumer loses
/// the oldest frames first, counted against that subscriber alone.
pub struct TelemetryHub {
    tx: broadcast::Sender<Frame>,
    subscribers: Mutex<HashMap<u64, SubscriberStats>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl TelemetryHub {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_QUEUE);
        Arc::new(Self {
            tx,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        })
    }

    pub fn publish(&self, frame: Frame) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // Send only fails when no subscriber exists; that is not an error.
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(self: &Arc<Self>) -> HubSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.tx.subscribe();
        self.subscribers
            .lock()
            .expect("hub subscriber lock poisoned")
            .insert(id, SubscriberStats::default());
        HubSubscription {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Idempotent: called from Drop, socket teardown, and shutdown alike.
    fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("hub subscriber lock poisoned")
            .remove(&id);
    }

    pub fn record_dropped(&self, id: u64, count: u64) {
        if let Some(stats) = self
            .subscribers
            .lock()
            .expect("hub subscriber lock poisoned")
            .get_mut(&id)
        {
            stats.dropped += count;
        }
    }

    pub fn dropped_for(&self, id: u64) -> u64 {
        self.subscribers
            .lock()
            .expect("hub subscriber lock poisoned")
            .get(&id)
            .map(|stats| stats.dropped)
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("hub subscriber lock poisoned")
            .len()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// A registered subscriber. Dropping it unregisters from the hub.
pub struct HubSubscription {
    pub id: u64,
    pub rx: broadcast::Receiver<Frame>,
    hub: Arc<TelemetryHub>,
}

impl HubSubscription {
    pub fn record_dropped(&self, count: u64) {
        self.hub.record_dropped(self.id, count);
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
