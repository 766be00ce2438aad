use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::event::DetectionEvent;

/// Append one record as a full JSONL line. The line is written in a single
/// call and flushed, so concurrent readers never see a torn record.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(value)?;
    writeln!(file, "{}", line)?;
    file.flush()?;
    Ok(())
}

/// Read every well-formed record; returns the records plus how many lines
/// failed to parse. A missing file reads as empty.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<(Vec<T>, usize)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut malformed = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(_) => malformed += 1,
        }
    }
    Ok((records, malformed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionStats {
    pub kept: usize,
    pub dropped: usize,
}

/// The raw detection event log. Appends come from the detection pipeline,
/// reads and the retention rewrite from the aggregation worker; one mutex
/// per log serializes them so a rewrite never races an append.
pub struct EventLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &DetectionEvent) -> anyhow::Result<()> {
        let _lock = self.guard.lock().expect("event log lock poisoned");
        append_jsonl(&self.path, event)
    }

    /// All parseable events currently in the log; malformed lines are
    /// skipped here and physically dropped by the next retention rewrite.
    pub fn read_all(&self) -> anyhow::Result<Vec<DetectionEvent>> {
        let _lock = self.guard.lock().expect("event log lock poisoned");
        let (events, malformed) = read_jsonl::<DetectionEvent>(&self.path)?;
        if malformed > 0 {
            debug!(malformed, "skipped malformed event log lines");
        }
        Ok(events)
    }

    /// Rewrite the log keeping only events at or after `cutoff`. Kept lines
    /// are carried over byte-for-byte; malformed lines are dropped. The new
    /// log is written to a temp sibling and swapped in with a rename.
    pub fn retain_since(&self, cutoff: NaiveDateTime) -> anyhow::Result<RetentionStats> {
        let _lock = self.guard.lock().expect("event log lock poisoned");
        if !self.path.exists() {
            return Ok(RetentionStats { kept: 0, dropped: 0 });
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut kept_lines: Vec<String> = Vec::new();
        let mut dropped = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DetectionEvent>(&line) {
                Ok(event) if event.timestamp >= cutoff => kept_lines.push(line),
                _ => dropped += 1,
            }
        }

        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for line in &kept_lines {
                writeln!(tmp, "{}", line)?;
            }
            tmp.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        Ok(RetentionStats {
            kept: kept_lines.len(),
            dropped,
        })
    }
}
