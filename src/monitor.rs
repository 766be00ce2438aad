use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::aggregate::{spawn_aggregation_worker, AggregationWorker};
use crate::config::AppConfig;
use crate::control::ControlProxy;
use crate::detector::{Detector, DisabledDetector};
use crate::discovery::{Discovery, Finding};
use crate::eventlog::EventLog;
use crate::hub::Hubs;
use crate::merge::MergeEngine;
use crate::pipeline::{spawn_detection_worker, DetectionPass};
use crate::registry::{SlotStatus, SourceRegistry};
use crate::stream::{join_with_timeout, StreamSupervisor, JOIN_TIMEOUT};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const BUCKETS_FILE: &str = "minute_rollups.jsonl";

/// The assembled system: registry, canvas, fan-out topics, per-slot stream
/// workers, the detection and aggregation workers, plus discovery and the
/// control proxy. Construction spawns the two shared workers; ingestion
/// workers come and go with discovery and stop requests.
pub struct Monitor {
    cfg: AppConfig,
    registry: Arc<SourceRegistry>,
    hubs: Hubs,
    merge: Arc<MergeEngine>,
    log: Arc<EventLog>,
    supervisor: StreamSupervisor,
    control: ControlProxy,
    stop: Arc<AtomicBool>,
    background: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(cfg: AppConfig) -> anyhow::Result<Self> {
        Self::with_detector(cfg, Box::new(DisabledDetector))
    }

    pub fn with_detector(cfg: AppConfig, detector: Box<dyn Detector>) -> anyhow::Result<Self> {
        let slot_count = cfg.slot_count();
        anyhow::ensure!(slot_count > 0, "no source ports configured");

        let data_dir = PathBuf::from(&cfg.storage.data_dir);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let registry = Arc::new(SourceRegistry::new(slot_count, cfg.stream.queue_capacity));
        let hubs = Hubs::new(slot_count);
        let merge = Arc::new(MergeEngine::new(
            slot_count,
            cfg.merge.cell_width,
            cfg.merge.cell_height,
        ));
        let log = Arc::new(EventLog::new(data_dir.join(EVENTS_FILE)));
        let supervisor = StreamSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&merge),
            hubs.clone(),
            cfg.stream.clone(),
        );
        let control = ControlProxy::new(
            Arc::clone(&registry),
            Duration::from_millis(cfg.control.timeout_millis),
        )?;
        let stop = Arc::new(AtomicBool::new(false));

        let monitor = Self {
            cfg,
            registry,
            hubs,
            merge,
            log,
            supervisor,
            control,
            stop,
            background: Mutex::new(Vec::new()),
        };
        monitor.spawn_shared_workers(detector);
        info!(slots = slot_count, data_dir = %data_dir.display(), "monitor ready");
        Ok(monitor)
    }

    fn spawn_shared_workers(&self, detector: Box<dyn Detector>) {
        let pass = DetectionPass::new(
            detector,
            self.merge.geometry(),
            self.cfg.detector.confidence_threshold,
        );
        let detection = spawn_detection_worker(
            pass,
            Arc::clone(&self.merge),
            Arc::clone(&self.registry),
            Arc::clone(&self.log),
            self.hubs.clone(),
            Duration::from_millis(self.cfg.detector.pass_interval_millis),
            Arc::clone(&self.stop),
        );

        let worker = AggregationWorker::new(
            Arc::clone(&self.log),
            PathBuf::from(&self.cfg.storage.data_dir).join(BUCKETS_FILE),
            self.cfg.storage.bucket_seconds,
            self.cfg.storage.retention_minutes,
            self.cfg.storage.cleanup_interval_minutes,
        );
        let aggregation = spawn_aggregation_worker(worker, Arc::clone(&self.stop));

        let mut background = self.background.lock().expect("background lock poisoned");
        background.push(detection);
        background.push(aggregation);
    }

    /// One tiered discovery sweep over the configured ports, binding each
    /// finding to its slot the moment it is confirmed. Discovery itself
    /// reports each port at most once per sweep.
    pub async fn discover_and_connect(&self) -> Vec<Finding> {
        let discovery =
            Discovery::new(self.cfg.sources.ports.clone(), self.cfg.discovery.clone());
        discovery
            .run(|finding| self.connect_port(&finding.address, finding.port))
            .await
    }

    /// Bind the slot configured for `port` to `address` and start its
    /// worker. Ports outside the configured list are ignored, as is any
    /// finding for a slot whose worker is still live; an explicit
    /// reconnect goes through the supervisor instead.
    pub fn connect_port(&self, address: &str, port: u16) {
        let Some(slot) = self.cfg.sources.ports.iter().position(|&p| p == port) else {
            warn!(port, "discovered port has no configured slot, ignoring");
            return;
        };
        if self.supervisor.is_running(slot) {
            debug!(slot, port, "slot already streaming, duplicate finding ignored");
            return;
        }
        self.supervisor.connect(slot, address, port);
    }

    pub fn stop_slot(&self, slot: usize) {
        self.supervisor.stop(slot);
    }

    /// Definite per-slot state for status consumers.
    pub fn status(&self) -> Vec<SlotStatus> {
        self.registry.status_all()
    }

    pub fn hubs(&self) -> &Hubs {
        &self.hubs
    }

    pub fn control(&self) -> &ControlProxy {
        &self.control
    }

    pub fn merge(&self) -> &Arc<MergeEngine> {
        &self.merge
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Ordered shutdown: ingestion workers first, then the shared detection
    /// and aggregation workers, everything joined with a timeout. A worker
    /// that fails to join is abandoned, not force-killed.
    pub fn shutdown(&self) {
        info!("monitor shutting down");
        self.supervisor.stop_all();
        self.stop.store(true, Ordering::Relaxed);

        let handles: Vec<_> = {
            let mut background = self.background.lock().expect("background lock poisoned");
            background.drain(..).collect()
        };
        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if !join_with_timeout(handle, JOIN_TIMEOUT) {
                warn!(worker = %name, "worker did not stop in time, abandoning thread");
            }
        }
        info!("monitor stopped");
    }
}
