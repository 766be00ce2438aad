use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use flowgrid::aggregate::{AggregatedBucket, AggregationWorker};
use flowgrid::event::{now_local_secs, DetectionEvent, Direction};
use flowgrid::eventlog::{read_jsonl, EventLog, RetentionStats};

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 25)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn event(ts: NaiveDateTime, slot: usize, direction: Option<Direction>, id: &str) -> DetectionEvent {
    DetectionEvent {
        timestamp: ts,
        slot,
        direction,
        detection_id: id.to_string(),
    }
}

fn worker_over(dir: &TempDir) -> (Arc<EventLog>, AggregationWorker, std::path::PathBuf) {
    let log = Arc::new(EventLog::new(dir.path().join("events.jsonl")));
    let buckets_path = dir.path().join("minute_rollups.jsonl");
    let worker = AggregationWorker::new(Arc::clone(&log), buckets_path.clone(), 60, 30, 5);
    (log, worker, buckets_path)
}

#[test]
fn test_one_minute_of_events_rolls_up_per_slot() {
    let dir = TempDir::new().unwrap();
    let (log, mut worker, buckets_path) = worker_over(&dir);

    // Baseline pass: records the boundary, finalizes nothing.
    assert!(worker.run_once(at(10, 15, 5)).unwrap().is_empty());

    // Twelve events for slot 2 in one minute: 7 right, 3 left, 2 unknown,
    // spread over four distinct detections.
    let directions = [
        Some(Direction::Right),
        Some(Direction::Right),
        Some(Direction::Right),
        Some(Direction::Right),
        Some(Direction::Right),
        Some(Direction::Right),
        Some(Direction::Right),
        Some(Direction::Left),
        Some(Direction::Left),
        Some(Direction::Left),
        None,
        None,
    ];
    for (i, dir_i) in directions.iter().enumerate() {
        let id = format!("src2_person_{}", i % 4);
        log.append(&event(at(10, 15, 1 + i as u32 * 4), 2, *dir_i, &id))
            .unwrap();
    }
    log.append(&event(at(10, 15, 10), 0, Some(Direction::Right), "src0_person_0"))
        .unwrap();
    log.append(&event(at(10, 15, 40), 0, None, "src0_person_0"))
        .unwrap();

    let written = worker.run_once(at(10, 16, 2)).unwrap();
    assert_eq!(written.len(), 2);

    assert_eq!(written[0].slot, 0);
    assert_eq!(written[0].bucket_start, at(10, 15, 0));
    assert_eq!(written[0].right_count, 1);
    assert_eq!(written[0].unknown_count, 1);
    assert_eq!(written[0].total_count, 2);
    assert_eq!(written[0].unique_detections, 1);

    assert_eq!(written[1].slot, 2);
    assert_eq!(written[1].bucket_start, at(10, 15, 0));
    assert_eq!(written[1].right_count, 7);
    assert_eq!(written[1].left_count, 3);
    assert_eq!(written[1].unknown_count, 2);
    assert_eq!(written[1].total_count, 12);
    assert_eq!(written[1].unique_detections, 4);

    let (on_disk, malformed) = read_jsonl::<AggregatedBucket>(&buckets_path).unwrap();
    assert_eq!(on_disk.len(), 2);
    assert_eq!(malformed, 0);

    // Same minute again: nothing new to finalize.
    assert!(worker.run_once(at(10, 16, 30)).unwrap().is_empty());
}

#[test]
fn test_events_straddling_a_boundary_split_into_two_buckets() {
    let dir = TempDir::new().unwrap();
    let (log, mut worker, _) = worker_over(&dir);

    assert!(worker.run_once(at(10, 15, 5)).unwrap().is_empty());
    log.append(&event(at(10, 15, 58), 1, Some(Direction::Right), "src1_person_0"))
        .unwrap();
    log.append(&event(at(10, 16, 2), 1, Some(Direction::Left), "src1_person_0"))
        .unwrap();

    let written = worker.run_once(at(10, 17, 1)).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].bucket_start, at(10, 15, 0));
    assert_eq!(written[0].right_count, 1);
    assert_eq!(written[0].total_count, 1);
    assert_eq!(written[1].bucket_start, at(10, 16, 0));
    assert_eq!(written[1].left_count, 1);
    assert_eq!(written[1].total_count, 1);
}

#[test]
fn test_sleep_until_boundary_tracks_the_wall_clock() {
    let dir = TempDir::new().unwrap();
    let (_, worker, _) = worker_over(&dir);
    assert_eq!(worker.until_next_boundary(at(10, 15, 20)), Duration::from_secs(40));
    assert_eq!(worker.until_next_boundary(at(10, 15, 0)), Duration::from_secs(60));
}

#[test]
fn test_retention_drops_expired_events_and_keeps_recent() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(EventLog::new(dir.path().join("events.jsonl")));
    let now = now_local_secs();

    for i in 0..2 {
        let ts = now - chrono::Duration::minutes(40) + chrono::Duration::seconds(i);
        log.append(&event(ts, 1, Some(Direction::Right), "src1_person_0"))
            .unwrap();
    }
    for i in 0..3 {
        let ts = now - chrono::Duration::minutes(5) + chrono::Duration::seconds(i);
        log.append(&event(ts, 1, Some(Direction::Left), "src1_person_1"))
            .unwrap();
    }

    // Interval 0 makes every pass eligible for a sweep.
    let mut worker = AggregationWorker::new(
        Arc::clone(&log),
        dir.path().join("minute_rollups.jsonl"),
        60,
        30,
        0,
    );
    let stats = worker.maybe_cleanup(now).unwrap().unwrap();
    assert_eq!(stats, RetentionStats { kept: 3, dropped: 2 });

    let remaining = log.read_all().unwrap();
    assert_eq!(remaining.len(), 3);
    let cutoff = now - chrono::Duration::minutes(30);
    assert!(remaining.iter().all(|e| e.timestamp >= cutoff));

    let again = worker.maybe_cleanup(now).unwrap().unwrap();
    assert_eq!(again, RetentionStats { kept: 3, dropped: 0 });

    // A fresh worker sweeps once at startup, then waits out its interval.
    let mut patient = AggregationWorker::new(
        Arc::clone(&log),
        dir.path().join("minute_rollups.jsonl"),
        60,
        30,
        5,
    );
    let startup = patient.maybe_cleanup(now).unwrap().unwrap();
    assert_eq!(startup, RetentionStats { kept: 3, dropped: 0 });
    assert!(patient.maybe_cleanup(now).unwrap().is_none());
}

#[test]
fn test_malformed_log_lines_survive_rollup_and_get_dropped_by_retention() {
    let dir = TempDir::new().unwrap();
    let (log, mut worker, _) = worker_over(&dir);
    let events_path = dir.path().join("events.jsonl");

    log.append(&event(at(10, 15, 10), 3, Some(Direction::Right), "src3_person_0"))
        .unwrap();
    {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .unwrap();
        writeln!(file, "wat").unwrap();
        writeln!(file, "{{\"slot\": 3,").unwrap();
    }
    log.append(&event(at(10, 15, 30), 3, None, "src3_person_1"))
        .unwrap();

    let (parsed, malformed) = read_jsonl::<DetectionEvent>(&events_path).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(malformed, 2);

    // Rollups only ever see the parseable lines.
    assert!(worker.run_once(at(10, 15, 2)).unwrap().is_empty());
    let written = worker.run_once(at(10, 16, 2)).unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].slot, 3);
    assert_eq!(written[0].total_count, 2);
    assert_eq!(written[0].right_count, 1);
    assert_eq!(written[0].unknown_count, 1);

    // The retention rewrite physically removes the junk.
    let stats = log.retain_since(at(10, 0, 0)).unwrap();
    assert_eq!(stats, RetentionStats { kept: 2, dropped: 2 });
    let raw = fs::read_to_string(&events_path).unwrap();
    assert_eq!(raw.lines().count(), 2);
}
