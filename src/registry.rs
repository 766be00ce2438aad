use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::RgbImage;
use serde::Serialize;

/// Lifecycle of the worker bound to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Connecting,
    Streaming,
    Stopping,
    Stopped,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Connecting => "connecting",
            SlotState::Streaming => "streaming",
            SlotState::Stopping => "stopping",
            SlotState::Stopped => "stopped",
        }
    }
}

/// Network location control requests for a slot are forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTarget {
    pub address: String,
    pub port: u16,
}

impl ControlTarget {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}/{}", self.address, self.port, path.trim_start_matches('/'))
    }
}

/// Most recently decoded frame for one slot. `seq` increases with every
/// store, so canvas rebuilds never observe a slot moving backwards.
#[derive(Clone)]
pub struct SlotFrame {
    pub image: Arc<RgbImage>,
    pub seq: u64,
    pub received_at: Instant,
}

struct SlotCell {
    frame: Mutex<Option<SlotFrame>>,
    queue_tx: flume::Sender<Arc<RgbImage>>,
    queue_rx: flume::Receiver<Arc<RgbImage>>,
    target: Mutex<Option<ControlTarget>>,
    state: Mutex<SlotState>,
}

impl SlotCell {
    fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = flume::bounded(queue_capacity.max(1));
        Self {
            frame: Mutex::new(None),
            queue_tx,
            queue_rx,
            target: Mutex::new(None),
            state: Mutex::new(SlotState::Stopped),
        }
    }
}

/// Definite per-slot state for status consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: usize,
    pub state: SlotState,
    pub connected: bool,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub queue_len: usize,
    pub frame_count: u64,
    pub last_frame_age_ms: Option<u64>,
}

/// Owned per-slot state: frame buffer, fallback queue, control target, and
/// worker lifecycle. Every accessor synchronizes on the one cell it touches,
/// so a slow reader of one slot never stalls ingestion on another.
pub struct SourceRegistry {
    cells: Vec<SlotCell>,
}

impl SourceRegistry {
    pub fn new(slot_count: usize, queue_capacity: usize) -> Self {
        Self {
            cells: (0..slot_count).map(|_| SlotCell::new(queue_capacity)).collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, slot: usize) -> Option<&SlotCell> {
        self.cells.get(slot)
    }

    /// Store the newest decoded frame and push it onto the fallback queue,
    /// dropping the oldest queued frame when the queue is full. Returns the
    /// frame sequence number, or None for an out-of-range slot.
    pub fn store_frame(&self, slot: usize, image: RgbImage) -> Option<u64> {
        let cell = self.cell(slot)?;
        let image = Arc::new(image);

        let seq = {
            let mut guard = cell.frame.lock().expect("frame lock poisoned");
            let seq = guard.as_ref().map(|f| f.seq + 1).unwrap_or(1);
            *guard = Some(SlotFrame {
                image: Arc::clone(&image),
                seq,
                received_at: Instant::now(),
            });
            seq
        };

        if cell.queue_tx.try_send(Arc::clone(&image)).is_err() {
            let _ = cell.queue_rx.try_recv();
            let _ = cell.queue_tx.try_send(image);
        }

        Some(seq)
    }

    pub fn latest_frame(&self, slot: usize) -> Option<SlotFrame> {
        self.cell(slot)?.frame.lock().expect("frame lock poisoned").clone()
    }

    /// Latest image per slot, in slot order, for canvas composition.
    pub fn frames(&self) -> Vec<Option<Arc<RgbImage>>> {
        (0..self.slot_count())
            .map(|slot| self.latest_frame(slot).map(|f| f.image))
            .collect()
    }

    pub fn pop_queued_frame(&self, slot: usize) -> Option<Arc<RgbImage>> {
        self.cell(slot)?.queue_rx.try_recv().ok()
    }

    pub fn queue_len(&self, slot: usize) -> usize {
        self.cell(slot).map(|c| c.queue_rx.len()).unwrap_or(0)
    }

    pub fn set_control_target(&self, slot: usize, target: ControlTarget) {
        if let Some(cell) = self.cell(slot) {
            *cell.target.lock().expect("target lock poisoned") = Some(target);
        }
    }

    pub fn control_target(&self, slot: usize) -> Option<ControlTarget> {
        self.cell(slot)?.target.lock().expect("target lock poisoned").clone()
    }

    pub fn set_state(&self, slot: usize, state: SlotState) {
        if let Some(cell) = self.cell(slot) {
            *cell.state.lock().expect("state lock poisoned") = state;
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.cell(slot)
            .map(|c| *c.state.lock().expect("state lock poisoned"))
            .unwrap_or(SlotState::Stopped)
    }

    pub fn is_active(&self, slot: usize) -> bool {
        matches!(self.state(slot), SlotState::Connecting | SlotState::Streaming)
    }

    /// Drop everything a departing worker leaves behind: the frame buffer,
    /// any queued frames, and the control target.
    pub fn clear_slot(&self, slot: usize) {
        let Some(cell) = self.cell(slot) else {
            return;
        };
        *cell.frame.lock().expect("frame lock poisoned") = None;
        while cell.queue_rx.try_recv().is_ok() {}
        *cell.target.lock().expect("target lock poisoned") = None;
    }

    pub fn status(&self, slot: usize) -> Option<SlotStatus> {
        let cell = self.cell(slot)?;
        let state = self.state(slot);
        let frame = cell.frame.lock().expect("frame lock poisoned").clone();
        let target = cell.target.lock().expect("target lock poisoned").clone();
        Some(SlotStatus {
            slot,
            state,
            connected: state == SlotState::Streaming,
            address: target.as_ref().map(|t| t.address.clone()),
            port: target.as_ref().map(|t| t.port),
            queue_len: cell.queue_rx.len(),
            frame_count: frame.as_ref().map(|f| f.seq).unwrap_or(0),
            last_frame_age_ms: frame
                .as_ref()
                .map(|f| f.received_at.elapsed().as_millis() as u64),
        })
    }

    pub fn status_all(&self) -> Vec<SlotStatus> {
        (0..self.slot_count()).filter_map(|slot| self.status(slot)).collect()
    }
}
