use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::event::{ts_format, DetectionEvent, Direction};
use crate::eventlog::{append_jsonl, EventLog, RetentionStats};

const ERROR_BACKOFF: Duration = Duration::from_secs(60);
const STOP_POLL: Duration = Duration::from_millis(250);

/// One finalized per-minute per-slot rollup, one JSONL line in the rollup
/// log. Written exactly once, after its minute has fully elapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedBucket {
    #[serde(with = "ts_format")]
    pub bucket_start: NaiveDateTime,
    pub slot: usize,
    pub right_count: u64,
    pub left_count: u64,
    pub unknown_count: u64,
    pub total_count: u64,
    pub unique_detections: u64,
}

/// Rolls the event log into minute buckets and periodically retires old
/// events. Single instance; runs on its own thread.
pub struct AggregationWorker {
    log: Arc<EventLog>,
    buckets_path: PathBuf,
    bucket_seconds: i64,
    retention: chrono::Duration,
    cleanup_interval: Duration,
    last_finalized: Option<NaiveDateTime>,
    last_cleanup: Option<Instant>,
}

impl AggregationWorker {
    pub fn new(
        log: Arc<EventLog>,
        buckets_path: PathBuf,
        bucket_seconds: i64,
        retention_minutes: i64,
        cleanup_interval_minutes: i64,
    ) -> Self {
        Self {
            log,
            buckets_path,
            bucket_seconds: bucket_seconds.max(1),
            retention: chrono::Duration::minutes(retention_minutes.max(1)),
            cleanup_interval: Duration::from_secs((cleanup_interval_minutes.max(0) as u64) * 60),
            last_finalized: None,
            last_cleanup: None,
        }
    }

    /// Truncate a timestamp down to its bucket boundary.
    pub fn bucket_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let secs = ts.and_utc().timestamp();
        let start = secs - secs.rem_euclid(self.bucket_seconds);
        chrono::DateTime::from_timestamp(start, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or(ts)
    }

    /// One scheduling pass at wall-clock `now`. The first call only records
    /// the baseline boundary; later calls finalize every bucket that has
    /// fully elapsed since, one bucket window at a time, appending the
    /// results to the rollup log.
    pub fn run_once(&mut self, now: NaiveDateTime) -> anyhow::Result<Vec<AggregatedBucket>> {
        let current_boundary = self.bucket_start(now);

        let Some(last) = self.last_finalized else {
            self.last_finalized = Some(current_boundary);
            info!(baseline = %current_boundary, "aggregation baseline recorded");
            return Ok(Vec::new());
        };

        if last >= current_boundary {
            return Ok(Vec::new());
        }

        let events = self.log.read_all()?;
        let width = chrono::Duration::seconds(self.bucket_seconds);
        let mut written = Vec::new();
        let mut start = last;
        while start + width <= current_boundary {
            let end = start + width;
            for bucket in aggregate_window(&events, start, end) {
                append_jsonl(&self.buckets_path, &bucket)?;
                written.push(bucket);
            }
            start = end;
        }
        self.last_finalized = Some(start);
        Ok(written)
    }

    /// Retire events older than the retention horizon. The first call sweeps
    /// immediately, so events left over from an earlier run are retired at
    /// startup; after that, sweeps wait out the cleanup interval. Runs
    /// independently of bucket finalization.
    pub fn maybe_cleanup(&mut self, now: NaiveDateTime) -> anyhow::Result<Option<RetentionStats>> {
        if let Some(last) = self.last_cleanup {
            if last.elapsed() < self.cleanup_interval {
                return Ok(None);
            }
        }
        self.last_cleanup = Some(Instant::now());
        let cutoff = now - self.retention;
        let stats = self.log.retain_since(cutoff)?;
        Ok(Some(stats))
    }

    /// How long to sleep from `now` until the next bucket boundary. Always
    /// recomputed from the wall clock, so scheduling never drifts.
    pub fn until_next_boundary(&self, now: NaiveDateTime) -> Duration {
        let next = self.bucket_start(now) + chrono::Duration::seconds(self.bucket_seconds);
        (next - now).to_std().unwrap_or(Duration::from_millis(500))
    }
}

/// Group one window's events by slot, folding absent directions into the
/// unknown count. Slots with no events produce no bucket.
fn aggregate_window(
    events: &[DetectionEvent],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<AggregatedBucket> {
    struct SlotCounts<'a> {
        right: u64,
        left: u64,
        unknown: u64,
        ids: HashSet<&'a str>,
    }

    let mut slots: BTreeMap<usize, SlotCounts> = BTreeMap::new();
    for event in events {
        if event.timestamp < start || event.timestamp >= end {
            continue;
        }
        let counts = slots.entry(event.slot).or_insert_with(|| SlotCounts {
            right: 0,
            left: 0,
            unknown: 0,
            ids: HashSet::new(),
        });
        match event.direction {
            Some(Direction::Right) => counts.right += 1,
            Some(Direction::Left) => counts.left += 1,
            None => counts.unknown += 1,
        }
        counts.ids.insert(event.detection_id.as_str());
    }

    slots
        .into_iter()
        .map(|(slot, counts)| AggregatedBucket {
            bucket_start: start,
            slot,
            right_count: counts.right,
            left_count: counts.left,
            unknown_count: counts.unknown,
            total_count: counts.right + counts.left + counts.unknown,
            unique_detections: counts.ids.len() as u64,
        })
        .collect()
}

/// Sleep in short slices so a stop request interrupts promptly.
fn sleep_with_stop(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        thread::sleep(STOP_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

pub fn spawn_aggregation_worker(
    mut worker: AggregationWorker,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("aggregation".into())
        .spawn(move || {
            info!("aggregation worker started");
            while !stop.load(Ordering::Relaxed) {
                let now = crate::event::now_local_secs();
                match worker.run_once(now) {
                    Ok(buckets) if !buckets.is_empty() => {
                        info!(buckets = buckets.len(), "finalized rollup buckets");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(error = %err, "aggregation pass failed, backing off");
                        sleep_with_stop(ERROR_BACKOFF, &stop);
                        continue;
                    }
                }

                match worker.maybe_cleanup(now) {
                    Ok(Some(stats)) => {
                        info!(kept = stats.kept, dropped = stats.dropped, "event log retention sweep");
                    }
                    Ok(None) => {}
                    Err(err) => error!(error = %err, "event log retention sweep failed"),
                }

                let wake = worker.until_next_boundary(crate::event::now_local_secs());
                sleep_with_stop(wake, &stop);
            }
            info!("aggregation worker stopped");
        })
        .expect("failed to spawn aggregation worker")
}
