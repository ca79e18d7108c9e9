//! Vision Layer
//!
//! Finds plate regions in frames and reads their text:
//! detect -> filter -> preprocess -> recognize -> validate.
//!
//! Region detection has two strategies (contour search or a learned object
//! detector); text is read by any [`TextRecognizer`], with a CRNN model
//! bundled.

pub mod detection;
pub mod filter;
pub mod geometry;
pub mod models;
pub mod object_detector;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod recognition;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::capture::Frame;
use crate::config::PipelineConfig;
use crate::error::PlateError;

pub use detection::{build_detector, CandidateRegion, GeometricDetector, LearnedDetector, RegionDetector};
pub use filter::CandidateFilter;
pub use geometry::{PixelBox, PlateShape, ShapeConstraints};
pub use models::{ModelKind, ModelManager, OnnxSession};
pub use object_detector::{ObjectBox, ObjectDetector, YoloPlateDetector};
pub use ocr::{assemble_plate_text, TextReading, TextRecognizer};
pub use ocr_preprocess::RegionPreprocessor;
pub use recognition::CrnnRecognizer;

/// An accepted plate reading
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub plate_text: String,
    pub bounds: PixelBox,
    /// Tilt of the plate in degrees
    pub angle: f32,
    /// Detector score (learned strategy only)
    pub confidence: Option<f32>,
    /// 1-based stream position, when the frame came from a stream
    pub frame_index: Option<u64>,
}

// Flat record: {plate, coordinates, angle, confidence?, frame?}
impl Serialize for Detection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = 3 + self.confidence.is_some() as usize + self.frame_index.is_some() as usize;
        let mut s = serializer.serialize_struct("Detection", fields)?;
        s.serialize_field("plate", &self.plate_text)?;
        s.serialize_field("coordinates", &self.bounds)?;
        s.serialize_field("angle", &self.angle)?;
        if let Some(confidence) = self.confidence {
            s.serialize_field("confidence", &confidence)?;
        } else {
            s.skip_field("confidence")?;
        }
        if let Some(frame) = self.frame_index {
            s.serialize_field("frame", &frame)?;
        } else {
            s.skip_field("frame")?;
        }
        s.end()
    }
}

/// Plate reading pipeline for single frames
///
/// Holds no per-frame state, so one instance can serve any number of
/// sequential frames and streams.
pub struct PlatePipeline {
    detector: Box<dyn RegionDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    filter: CandidateFilter,
    preprocessor: RegionPreprocessor,
    confidence_threshold: f32,
    min_plate_length: usize,
}

impl PlatePipeline {
    /// Build a pipeline from configuration
    ///
    /// `object_detector` is required when the learned strategy is selected.
    pub fn new(
        config: &PipelineConfig,
        recognizer: Arc<dyn TextRecognizer>,
        object_detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Result<Self, PlateError> {
        let detector = build_detector(config.detector_strategy, &config.geometric, object_detector)?;
        Ok(Self::with_detector(config, detector, recognizer))
    }

    /// Build a pipeline around an existing region detector
    pub fn with_detector(
        config: &PipelineConfig,
        detector: Box<dyn RegionDetector>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            detector,
            recognizer,
            filter: CandidateFilter::from_settings(&config.geometric),
            preprocessor: RegionPreprocessor::new(config.preprocess.clone()),
            confidence_threshold: config.confidence_threshold,
            min_plate_length: config.min_plate_length,
        }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Accepted plates in candidate order
    ///
    /// A recognizer failure skips only the candidate it happened on.
    pub fn analyze_frame(&self, frame: &Frame) -> Result<Vec<Detection>, PlateError> {
        let start = Instant::now();
        let (width, height) = frame.dimensions();

        let raw = self.detector.detect_candidates(frame)?;
        let candidates = self.filter.normalize(&raw, width, height);
        let order = self.recognizer.channel_order();

        let mut detections = Vec::new();
        for candidate in &candidates {
            let Some(crop) = self.preprocessor.prepare(frame, candidate, order) else {
                debug!("Skipping empty crop {:?}", candidate.bounds);
                continue;
            };

            let readings = match self.recognizer.recognize(&crop) {
                Ok(readings) => readings,
                Err(e) => {
                    let err = PlateError::Recognizer(format!("{:#}", e));
                    warn!("{} (candidate {:?})", err, candidate.bounds);
                    continue;
                }
            };

            let Some(plate_text) = assemble_plate_text(&readings, self.confidence_threshold, self.min_plate_length)
            else {
                debug!("Rejected readings {:?} for {:?}", readings, candidate.bounds);
                continue;
            };

            detections.push(Detection {
                plate_text,
                bounds: candidate.bounds,
                angle: candidate.angle,
                confidence: candidate.confidence,
                frame_index: frame.index,
            });
        }

        debug!(
            "Frame {:?} ({}): {} raw, {} filtered, {} plates in {:?}",
            frame.index,
            self.detector.name(),
            raw.len(),
            candidates.len(),
            detections.len(),
            start.elapsed()
        );

        Ok(detections)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reads a fixed plate from every crop
    pub struct StubRecognizer {
        pub text: String,
        pub confidence: f32,
        pub calls: AtomicUsize,
    }

    impl StubRecognizer {
        pub fn new(text: &str, confidence: f32) -> Self {
            Self {
                text: text.to_string(),
                confidence,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextRecognizer for StubRecognizer {
        fn recognize(&self, _crop: &RgbImage) -> anyhow::Result<Vec<TextReading>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![TextReading::new(self.text.clone(), self.confidence)])
        }
    }

    /// Emits a fixed candidate list for every frame
    pub struct ScriptedDetector(pub Vec<CandidateRegion>);

    impl RegionDetector for ScriptedDetector {
        fn detect_candidates(&self, _frame: &Frame) -> Result<Vec<CandidateRegion>, PlateError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    pub fn plate_candidate(bounds: PixelBox) -> CandidateRegion {
        CandidateRegion {
            bounds,
            angle: 0.0,
            shape: PlateShape::oriented(bounds.width as f32, bounds.height as f32, 0.0),
            confidence: None,
        }
    }
}
