use image::RgbImage;

/// COCO class id for "person", the only class the flow pipeline asks for.
pub const PERSON_CLASS_ID: u32 = 0;

/// Pixel-space bounding box on the frame the detector was given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
}

/// Capability interface for the external detection model. The pipeline
/// depends only on this contract; implementations filter to the requested
/// classes and confidence before returning.
pub trait Detector: Send {
    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
        class_filter: &[u32],
    ) -> anyhow::Result<Vec<RawDetection>>;
}

/// Stand-in used when no model runtime is wired up: every pass sees zero
/// detections and the rest of the pipeline keeps running.
pub struct DisabledDetector;

impl Detector for DisabledDetector {
    fn detect(
        &mut self,
        _frame: &RgbImage,
        _confidence_threshold: f32,
        _class_filter: &[u32],
    ) -> anyhow::Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}
