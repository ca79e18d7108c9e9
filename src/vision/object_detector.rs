//! Learned plate detector
//!
//! [`ObjectDetector`] is the collaborator behind the learned region strategy.
//! [`YoloPlateDetector`] implements it with a single-class YOLO-style ONNX
//! model.

use anyhow::{Context, Result};
use ndarray::{ArrayViewD, IxDyn};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::geometry::PixelBox;
use super::models::OnnxSession;
use super::preprocess::{hwc_to_nchw, image_to_f32, letterbox};
use crate::capture::Frame;
use crate::config::DetectorModelConfig;

/// Scored box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl ObjectBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &ObjectBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Smallest whole-pixel box covering this one, cut at the frame origin
    pub fn to_pixel_box(&self) -> PixelBox {
        let x1 = self.x.max(0.0).floor();
        let y1 = self.y.max(0.0).floor();
        let x2 = (self.x + self.width).max(0.0).ceil();
        let y2 = (self.y + self.height).max(0.0).ceil();
        PixelBox::new(
            x1 as u32,
            y1 as u32,
            (x2 - x1).max(0.0) as u32,
            (y2 - y1).max(0.0) as u32,
        )
    }
}

/// Finds plate boxes in a frame
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<ObjectBox>>;
}

/// Greedy non-maximum suppression, highest score first
pub fn non_max_suppression(mut boxes: Vec<ObjectBox>, iou_threshold: f32, max_detections: usize) -> Vec<ObjectBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<ObjectBox> = Vec::new();
    for candidate in boxes {
        if kept.len() >= max_detections {
            break;
        }
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Parse `[1, 4 + classes, N]` or `[1, N, 4 + classes]` rows of
/// `cx, cy, w, h, scores...` in model input pixels
///
/// Boxes are mapped back to frame pixels by dividing by `scale`.
pub fn decode_yolo_output(output: ArrayViewD<'_, f32>, score_threshold: f32, scale: f32) -> Result<Vec<ObjectBox>> {
    let shape = output.shape().to_vec();
    let [1, a, b] = shape.as_slice() else {
        anyhow::bail!("Unexpected detector output shape: {:?}", shape);
    };
    let (a, b) = (*a, *b);

    // Attribute axis is the short one
    let channels_first = a <= b;
    let (attributes, count) = if channels_first { (a, b) } else { (b, a) };
    if attributes < 5 {
        anyhow::bail!("Detector output has {} attributes, need at least 5", attributes);
    }

    let value = |i: usize, attr: usize| -> f32 {
        if channels_first {
            output[IxDyn(&[0, attr, i])]
        } else {
            output[IxDyn(&[0, i, attr])]
        }
    };

    let scale = if scale > 0.0 { scale } else { 1.0 };
    let mut boxes = Vec::new();
    for i in 0..count {
        let score = (4..attributes).map(|attr| value(i, attr)).fold(f32::NEG_INFINITY, f32::max);
        if score < score_threshold {
            continue;
        }
        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        boxes.push(ObjectBox::new(
            (cx - w / 2.0) / scale,
            (cy - h / 2.0) / scale,
            w / scale,
            h / scale,
            score,
        ));
    }

    Ok(boxes)
}

/// YOLO-style single-class plate detector
pub struct YoloPlateDetector {
    session: Mutex<OnnxSession>,
    input_name: String,
    config: DetectorModelConfig,
}

impl YoloPlateDetector {
    pub fn load(model_path: &Path, config: &DetectorModelConfig, intra_threads: usize) -> Result<Self> {
        let session = OnnxSession::new(model_path, intra_threads)?;
        let input_name = session.first_input()?.to_string();
        info!("Loaded plate detector (input {}px)", config.input_size);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            config: config.clone(),
        })
    }
}

impl ObjectDetector for YoloPlateDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<ObjectBox>> {
        let (boxed, scale) = letterbox(&image_to_f32(frame.image()), self.config.input_size);
        let input = hwc_to_nchw(&boxed);

        let mut session = self.session.lock();
        let input_value = Value::from_array(input).context("Failed to create input tensor")?;
        let outputs = session
            .session_mut()
            .run(ort::inputs![&self.input_name => input_value])
            .context("Detection inference failed")?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        let raw = decode_yolo_output(output, self.config.score_threshold, scale)?;
        let raw_count = raw.len();
        let kept = non_max_suppression(raw, self.config.iou_threshold, self.config.max_detections);
        debug!("Plate detector: {} raw boxes, {} after NMS", raw_count, kept.len());

        Ok(kept)
    }
}
