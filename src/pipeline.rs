use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::detector::{Detector, PERSON_CLASS_ID};
use crate::draw;
use crate::event::{classify_direction, now_local_secs, DetectionEvent, Direction};
use crate::eventlog::EventLog;
use crate::hub::Hubs;
use crate::merge::{GridGeometry, MergeEngine};
use crate::mjpeg;
use crate::registry::SourceRegistry;

const BOX_COLOR: Rgb<u8> = Rgb([40, 220, 40]);

/// One detection pass over the merged canvas: run the model, map each hit
/// back to a slot by its center position, classify movement, annotate.
///
/// Identity is the detection's index within the pass, scoped to its slot. It
/// is not a persistent track: direction stays meaningful only while the same
/// index keeps landing on the same person between passes.
pub struct DetectionPass {
    detector: Box<dyn Detector>,
    geometry: GridGeometry,
    confidence_threshold: f32,
    previous_centers: HashMap<String, f32>,
}

impl DetectionPass {
    pub fn new(
        detector: Box<dyn Detector>,
        geometry: GridGeometry,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            detector,
            geometry,
            confidence_threshold,
            previous_centers: HashMap::new(),
        }
    }

    /// Returns the annotated canvas plus one event per detection. Any
    /// detector failure degrades to zero detections; the pass never errors.
    pub fn process(&mut self, canvas: &RgbImage) -> (RgbImage, Vec<DetectionEvent>) {
        let detections = match self.detector.detect(
            canvas,
            self.confidence_threshold,
            &[PERSON_CLASS_ID],
        ) {
            Ok(detections) => detections,
            Err(err) => {
                warn!(error = %err, "detector failed, treating pass as empty");
                Vec::new()
            }
        };

        let mut annotated = canvas.clone();
        let mut events = Vec::with_capacity(detections.len());

        for (index, detection) in detections.iter().enumerate() {
            let (cx, cy) = detection.bbox.center();
            let slot = self.geometry.slot_for_center(cx, cy);
            let detection_id = format!("src{}_person_{}", slot, index);

            let direction = classify_direction(
                self.previous_centers.get(&detection_id).copied(),
                cx,
            );
            self.previous_centers.insert(detection_id.clone(), cx);

            annotate(&mut annotated, detection, direction);

            events.push(DetectionEvent {
                timestamp: now_local_secs(),
                slot,
                direction,
                detection_id,
            });
        }

        (annotated, events)
    }
}

fn annotate(canvas: &mut RgbImage, detection: &crate::detector::RawDetection, direction: Option<Direction>) {
    let bbox = detection.bbox;
    draw::draw_rect(
        canvas,
        bbox.x1 as i64,
        bbox.y1 as i64,
        bbox.x2 as i64,
        bbox.y2 as i64,
        2,
        BOX_COLOR,
    );
    let label = match direction {
        Some(d) => format!("PERSON {:.0}% {}", detection.confidence * 100.0, d.as_str().to_uppercase()),
        None => format!("PERSON {:.0}%", detection.confidence * 100.0),
    };
    draw::draw_text(canvas, &label, bbox.x1 as i64, bbox.y1 as i64 - 14, 1, BOX_COLOR);
}

/// Long-running pass loop: grab the current canvas, detect, append events to
/// the log, publish the annotated canvas and each event, sleep, repeat. Slots
/// with no live source get their placeholder published on each pass, so
/// per-slot viewers always have a current frame.
pub fn spawn_detection_worker(
    mut pass: DetectionPass,
    merge: Arc<MergeEngine>,
    registry: Arc<SourceRegistry>,
    log: Arc<EventLog>,
    hubs: Hubs,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("detection".into())
        .spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "detection worker started");

            // The same image an empty canvas cell shows, encoded once.
            let placeholders: Vec<Option<Vec<u8>>> = (0..registry.slot_count())
                .map(|slot| mjpeg::encode_jpeg(&merge.placeholder_cell(slot)).ok())
                .collect();

            while !stop.load(Ordering::Relaxed) {
                let canvas = merge.current();
                let (annotated, events) = pass.process(&canvas);

                for event in events {
                    if let Err(err) = log.append(&event) {
                        // Ingestion keeps going; the event is lost, not retried.
                        warn!(error = %err, "event log append failed");
                    }
                    hubs.events.publish(event);
                }

                match mjpeg::encode_jpeg(&annotated) {
                    Ok(jpeg) => hubs.merged.publish(jpeg),
                    Err(err) => debug!(error = %err, "merged canvas encode failed"),
                }

                for (slot, frame) in registry.frames().iter().enumerate() {
                    if frame.is_some() {
                        continue;
                    }
                    if let (Some(topic), Some(placeholder)) =
                        (hubs.slots.get(slot), placeholders.get(slot).and_then(|p| p.as_ref()))
                    {
                        topic.publish(placeholder.clone());
                    }
                }

                thread::sleep(interval);
            }
            info!("detection worker stopped");
        })
        .expect("failed to spawn detection worker")
}
