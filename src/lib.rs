//! Multi-camera people-flow monitor: tiered source discovery, per-slot
//! MJPEG ingestion workers, fixed-grid frame compositing, person-detection
//! events with coarse left/right direction, and minute-level directional
//! rollups with bounded retention.

pub mod aggregate;
pub mod config;
pub mod control;
pub mod detector;
pub mod discovery;
pub mod draw;
pub mod event;
pub mod eventlog;
pub mod hub;
pub mod logging;
pub mod merge;
pub mod mjpeg;
pub mod monitor;
pub mod pipeline;
pub mod registry;
pub mod stream;
