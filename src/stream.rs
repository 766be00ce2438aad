use std::io::BufReader;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::hub::Hubs;
use crate::merge::MergeEngine;
use crate::mjpeg::{self, MjpegReader};
use crate::registry::{ControlTarget, SlotState, SourceRegistry};

/// Consecutive failed reads between warnings.
const FAILURE_LOG_EVERY: u64 = 10;

/// How long stopping waits for a worker thread before abandoning it.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Owns the per-slot ingestion workers. At most one worker is ever alive
/// per slot: connecting an occupied slot stops the old worker before the
/// new one starts, never overlapping the two. A worker that outlived its
/// join timeout holds a stale generation token, so whatever it does when
/// it finally unblocks cannot touch a successor's slot state.
pub struct StreamSupervisor {
    registry: Arc<SourceRegistry>,
    merge: Arc<MergeEngine>,
    hubs: Hubs,
    cfg: StreamConfig,
    workers: Mutex<Vec<Option<WorkerHandle>>>,
    generations: Vec<Arc<AtomicU64>>,
}

impl StreamSupervisor {
    pub fn new(
        registry: Arc<SourceRegistry>,
        merge: Arc<MergeEngine>,
        hubs: Hubs,
        cfg: StreamConfig,
    ) -> Self {
        let slots = registry.slot_count();
        Self {
            registry,
            merge,
            hubs,
            cfg,
            workers: Mutex::new((0..slots).map(|_| None).collect()),
            generations: (0..slots).map(|_| Arc::new(AtomicU64::new(0))).collect(),
        }
    }

    /// Bind a slot to a resolved source and start pulling its stream.
    pub fn connect(&self, slot: usize, address: &str, port: u16) {
        if slot >= self.registry.slot_count() {
            warn!(slot, "connect requested for out-of-range slot");
            return;
        }
        self.stop(slot);
        // Invalidate any abandoned predecessor before the slot is rebound:
        // its late exit must find a token that is no longer its own.
        let generation = self.generations[slot].fetch_add(1, Ordering::Relaxed) + 1;

        // The control target is on record from the moment the slot binds.
        self.registry.set_control_target(
            slot,
            ControlTarget {
                address: address.to_string(),
                port,
            },
        );
        self.registry.set_state(slot, SlotState::Connecting);
        self.hubs
            .publish_status(slot, SlotState::Connecting, Some(format!("{}:{}", address, port)));

        let stop = Arc::new(AtomicBool::new(false));
        let worker = StreamWorker {
            slot,
            url: format!("http://{}:{}/stream", address, port),
            registry: Arc::clone(&self.registry),
            merge: Arc::clone(&self.merge),
            hubs: self.hubs.clone(),
            cfg: self.cfg.clone(),
            stop: Arc::clone(&stop),
            generation,
            slot_generation: Arc::clone(&self.generations[slot]),
        };
        let thread = thread::Builder::new()
            .name(format!("stream-{}", slot))
            .spawn(move || worker.run())
            .expect("failed to spawn stream worker");

        let mut workers = self.workers.lock().expect("workers lock poisoned");
        workers[slot] = Some(WorkerHandle { stop, thread });
        info!(slot, address, port, "stream worker started");
    }

    /// Stop a slot's worker if one is running, waiting up to JOIN_TIMEOUT.
    /// A worker that fails to join in time is abandoned, not force-killed.
    pub fn stop(&self, slot: usize) {
        let handle = {
            let mut workers = self.workers.lock().expect("workers lock poisoned");
            workers.get_mut(slot).and_then(Option::take)
        };
        let Some(handle) = handle else {
            return;
        };

        self.registry.set_state(slot, SlotState::Stopping);
        handle.stop.store(true, Ordering::Relaxed);
        if join_with_timeout(handle.thread, JOIN_TIMEOUT) {
            self.registry.set_state(slot, SlotState::Stopped);
        } else {
            warn!(slot, "stream worker did not stop in time, abandoning thread");
        }
    }

    pub fn stop_all(&self) {
        for slot in 0..self.registry.slot_count() {
            self.stop(slot);
        }
    }

    pub fn is_running(&self, slot: usize) -> bool {
        let workers = self.workers.lock().expect("workers lock poisoned");
        workers
            .get(slot)
            .and_then(|w| w.as_ref())
            .map(|w| !w.thread.is_finished())
            .unwrap_or(false)
    }
}

/// Join a thread for at most `timeout`. Returns whether it terminated.
pub(crate) fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}

/// One slot's pull loop: connecting -> streaming -> stopping -> stopped.
///
/// A failed handshake is fatal and the slot goes straight to stopped. Once
/// streaming, failed reads and undecodable parts are counted and retried in
/// place; only end-of-stream or the stop flag ends the loop. Whatever the
/// exit path, a worker that still owns its slot leaves it empty: frame
/// buffer, queue, and control target are all cleared, and the canvas cell
/// reverts to its placeholder. A worker whose slot has since been rebound
/// exits without touching anything.
struct StreamWorker {
    slot: usize,
    url: String,
    registry: Arc<SourceRegistry>,
    merge: Arc<MergeEngine>,
    hubs: Hubs,
    cfg: StreamConfig,
    stop: Arc<AtomicBool>,
    generation: u64,
    slot_generation: Arc<AtomicU64>,
}

impl StreamWorker {
    fn run(self) {
        let detail = match self.pull_stream() {
            Ok(frames) => {
                info!(slot = self.slot, frames, "stream worker exiting");
                None
            }
            Err(err) => {
                warn!(slot = self.slot, error = %err, "stream worker failed");
                Some(err.to_string())
            }
        };

        if self.slot_generation.load(Ordering::Relaxed) != self.generation {
            // A replacement owns the slot now; cleaning up here would wipe
            // its binding and lie about its state.
            debug!(slot = self.slot, "superseded worker exited, slot left to its successor");
            return;
        }

        self.registry.clear_slot(self.slot);
        self.registry.set_state(self.slot, SlotState::Stopped);
        self.hubs.publish_status(self.slot, SlotState::Stopped, detail);
        self.merge.recompose_with(|| self.registry.frames());
    }

    fn pull_stream(&self) -> anyhow::Result<u64> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(self.cfg.connect_timeout_secs))
            // The body is a live stream, so it gets no total deadline; each
            // socket read gets one, so a source that goes silent surfaces
            // as a failed read instead of parking the worker. The blocking
            // client's `timeout` is per read/write operation, not a whole
            // request deadline.
            .timeout(Duration::from_secs(self.cfg.read_timeout_secs))
            .build()?;

        let response = client.get(&self.url).send()?.error_for_status()?;
        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(mjpeg::parse_boundary)
            .unwrap_or_else(|| format!("--{}", mjpeg::BOUNDARY));

        self.registry.set_state(self.slot, SlotState::Streaming);
        self.hubs.publish_status(self.slot, SlotState::Streaming, None);
        info!(slot = self.slot, url = %self.url, "stream connected");

        let retry = Duration::from_millis(self.cfg.read_retry_millis);
        let mut reader = MjpegReader::new(BufReader::new(response), boundary);
        let mut frames: u64 = 0;
        let mut failures: u64 = 0;

        while !self.stop.load(Ordering::Relaxed) {
            match reader.next_frame() {
                Ok(Some(part)) => match mjpeg::decode_jpeg(&part) {
                    Ok(image) => {
                        failures = 0;
                        frames += 1;
                        self.registry.store_frame(self.slot, image);
                        self.merge.recompose_with(|| self.registry.frames());
                        if let Some(topic) = self.hubs.slots.get(self.slot) {
                            topic.publish(part);
                        }
                        if frames == 1 {
                            info!(slot = self.slot, "first frame decoded");
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        if failures % FAILURE_LOG_EVERY == 0 {
                            warn!(slot = self.slot, failures, error = %err, "frame decode failing");
                        }
                        thread::sleep(retry);
                    }
                },
                Ok(None) => {
                    info!(slot = self.slot, frames, "stream ended by source");
                    break;
                }
                Err(err) => {
                    failures += 1;
                    if failures % FAILURE_LOG_EVERY == 0 {
                        warn!(slot = self.slot, failures, error = %err, "stream read failing");
                    }
                    thread::sleep(retry);
                }
            }
        }
        Ok(frames)
    }
}
