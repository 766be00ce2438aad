use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Horizontal movement of a detection center between two passes, in pixels,
/// below which the movement is reported as unknown.
pub const DIRECTION_THRESHOLD_PX: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// Classify movement from the previous horizontal center to the current one.
/// No previous position means the direction cannot be known yet.
pub fn classify_direction(prev_cx: Option<f32>, cx: f32) -> Option<Direction> {
    let prev = prev_cx?;
    let dx = cx - prev;
    if dx > DIRECTION_THRESHOLD_PX {
        Some(Direction::Right)
    } else if dx < -DIRECTION_THRESHOLD_PX {
        Some(Direction::Left)
    } else {
        None
    }
}

/// One raw detection, one JSONL line in the event log. Immutable once
/// written; retired by the aggregation worker's retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    #[serde(with = "ts_format")]
    pub timestamp: NaiveDateTime,
    pub slot: usize,
    pub direction: Option<Direction>,
    pub detection_id: String,
}

/// Local wall-clock now, truncated to whole seconds.
pub fn now_local_secs() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Second-precision local timestamps, `2026-08-25T14:03:07`. Records that do
/// not parse exactly are treated as malformed by readers.
pub mod ts_format {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_thresholds() {
        assert_eq!(classify_direction(Some(100.0), 106.0), Some(Direction::Right));
        assert_eq!(classify_direction(Some(100.0), 94.0), Some(Direction::Left));
        assert_eq!(classify_direction(Some(100.0), 105.0), None);
        assert_eq!(classify_direction(Some(100.0), 95.0), None);
        assert_eq!(classify_direction(Some(100.0), 100.0), None);
    }

    #[test]
    fn no_previous_position_is_unknown() {
        assert_eq!(classify_direction(None, 300.0), None);
    }

    #[test]
    fn event_json_shape() {
        let ts = NaiveDateTime::parse_from_str("2026-08-25T14:03:07", ts_format::FORMAT).unwrap();
        let ev = DetectionEvent {
            timestamp: ts,
            slot: 2,
            direction: Some(Direction::Left),
            detection_id: "src2_person_0".to_string(),
        };
        let line = serde_json::to_string(&ev).unwrap();
        assert!(line.contains("\"timestamp\":\"2026-08-25T14:03:07\""));
        assert!(line.contains("\"direction\":\"left\""));

        let back: DetectionEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.slot, 2);
        assert_eq!(back.direction, Some(Direction::Left));
    }

    #[test]
    fn unknown_direction_serializes_as_null() {
        let ev = DetectionEvent {
            timestamp: now_local_secs(),
            slot: 0,
            direction: None,
            detection_id: "src0_person_1".to_string(),
        };
        let line = serde_json::to_string(&ev).unwrap();
        assert!(line.contains("\"direction\":null"));
    }

    #[test]
    fn fractional_timestamps_are_rejected() {
        let line = r#"{"timestamp":"2026-08-25T14:03:07.123","slot":0,"direction":null,"detection_id":"x"}"#;
        assert!(serde_json::from_str::<DetectionEvent>(line).is_err());
    }
}
