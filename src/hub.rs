use tokio::sync::broadcast;

use crate::event::DetectionEvent;
use crate::registry::SlotState;

/// Encoded JPEG bytes as published to stream consumers.
pub type Frame = Vec<u8>;

const TOPIC_CAPACITY: usize = 16;

/// Bounded broadcast topic. Publishing never blocks; subscribers that fall
/// behind lose the oldest messages instead of stalling the publisher.
#[derive(Clone)]
pub struct Topic<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(TOPIC_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Fire-and-forget send. A send with no live subscribers is not an error.
    pub fn publish(&self, value: T) {
        let _ = self.tx.send(value);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot lifecycle notification for real-time status consumers.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub slot: usize,
    pub state: SlotState,
    pub detail: Option<String>,
}

/// All real-time fan-out topics, one bundle shared across workers.
#[derive(Clone)]
pub struct Hubs {
    /// Composited + annotated canvas frames.
    pub merged: Topic<Frame>,
    /// Latest frame per slot, indexed by slot: the source's raw frame, or
    /// the slot's placeholder while no source is bound.
    pub slots: Vec<Topic<Frame>>,
    /// Raw detection events as they are logged.
    pub events: Topic<DetectionEvent>,
    /// Slot connect/disconnect transitions.
    pub status: Topic<StatusEvent>,
}

impl Hubs {
    pub fn new(slot_count: usize) -> Self {
        Self {
            merged: Topic::new(),
            slots: (0..slot_count).map(|_| Topic::new()).collect(),
            events: Topic::new(),
            status: Topic::new(),
        }
    }

    pub fn publish_status(&self, slot: usize, state: SlotState, detail: Option<String>) {
        self.status.publish(StatusEvent { slot, state, detail });
    }
}
