//! Application Configuration
//!
//! Pipeline tunables, model locations and server settings stored in TOML
//! format. Every section has defaults, so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::ChannelOrder;
use crate::error::PlateError;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Detection and recognition pipeline
    pub pipeline: PipelineConfig,
    /// ONNX model files
    pub models: ModelsConfig,
    /// HTTP/WebSocket server
    pub server: ServerConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PlateError> {
        let p = &self.pipeline;
        if p.video_sample_interval == 0 || p.live_sample_interval == 0 {
            return Err(PlateError::Config("sample interval must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&p.confidence_threshold) {
            return Err(PlateError::Config(format!(
                "confidence_threshold {} outside [0, 1]",
                p.confidence_threshold
            )));
        }
        if p.min_plate_length == 0 {
            return Err(PlateError::Config("min_plate_length must be at least 1".into()));
        }

        let g = &p.geometric;
        if g.min_aspect <= 0.0 || g.min_aspect >= g.max_aspect {
            return Err(PlateError::Config(format!(
                "aspect range ({}, {}) is empty",
                g.min_aspect, g.max_aspect
            )));
        }
        if g.max_contours == 0 {
            return Err(PlateError::Config("max_contours must be at least 1".into()));
        }
        if g.canny_low > g.canny_high {
            return Err(PlateError::Config("canny_low exceeds canny_high".into()));
        }

        if p.preprocess.clahe_tile_grid == 0 || p.preprocess.clahe_clip_limit <= 0.0 {
            return Err(PlateError::Config("CLAHE needs a positive clip limit and tile grid".into()));
        }

        let det = &self.models.detector;
        if det.input_size == 0 {
            return Err(PlateError::Config("detector input_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&det.score_threshold) || !(0.0..=1.0).contains(&det.iou_threshold) {
            return Err(PlateError::Config("detector thresholds must lie in [0, 1]".into()));
        }

        let rec = &self.models.recognizer;
        if rec.input_height == 0 || rec.max_width == 0 {
            return Err(PlateError::Config("recognizer input size must be positive".into()));
        }
        if rec.charset.is_empty() && rec.dictionary_file.is_none() {
            return Err(PlateError::Config("recognizer needs a charset or dictionary".into()));
        }

        if self.server.max_upload_mb == 0 || self.server.live_idle_timeout_secs == 0 {
            return Err(PlateError::Config("upload limit and live idle timeout must be positive".into()));
        }

        Ok(())
    }
}

/// Which region detector runs first in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStrategy {
    /// Edge and color contour search
    #[default]
    Geometric,
    /// Trained object detector model
    Learned,
}

impl std::str::FromStr for DetectorStrategy {
    type Err = PlateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geometric" => Ok(DetectorStrategy::Geometric),
            "learned" => Ok(DetectorStrategy::Learned),
            other => Err(PlateError::Config(format!("unknown detector strategy '{}'", other))),
        }
    }
}

/// Detection and recognition pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Readings at or below this confidence are dropped
    pub confidence_threshold: f32,
    /// Minimum character count of an accepted plate
    pub min_plate_length: usize,
    /// Analyze every Nth frame of a video
    pub video_sample_interval: u64,
    /// Analyze every Nth frame of a live stream
    pub live_sample_interval: u64,
    /// Region detector to use
    pub detector_strategy: DetectorStrategy,
    /// Contour search tunables
    pub geometric: GeometricSettings,
    /// Crop enhancement tunables
    pub preprocess: PreprocessSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            min_plate_length: 6,
            video_sample_interval: 30,
            live_sample_interval: 5,
            detector_strategy: DetectorStrategy::Geometric,
            geometric: GeometricSettings::default(),
            preprocess: PreprocessSettings::default(),
        }
    }
}

/// Tunables of the edge and color contour search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricSettings {
    /// Bilateral filter neighbourhood diameter in pixels
    pub bilateral_diameter: u32,
    /// Bilateral filter intensity sigma
    pub bilateral_sigma_color: f32,
    /// Bilateral filter spatial sigma
    pub bilateral_sigma_space: f32,
    /// Canny low hysteresis threshold
    pub canny_low: f32,
    /// Canny high hysteresis threshold
    pub canny_high: f32,
    /// Lower HSV bound of the yellow plate mask (H 0-180, S/V 0-255)
    pub yellow_lower: [u8; 3],
    /// Upper HSV bound of the yellow plate mask
    pub yellow_upper: [u8; 3],
    /// Number of largest contours examined
    pub max_contours: usize,
    /// Exclusive lower bound of width / height
    pub min_aspect: f32,
    /// Exclusive upper bound of width / height
    pub max_aspect: f32,
    /// Largest accepted absolute tilt in degrees
    pub max_angle: f32,
    /// Pixels added around each accepted bounding box
    pub padding: u32,
}

impl Default for GeometricSettings {
    fn default() -> Self {
        Self {
            bilateral_diameter: 11,
            bilateral_sigma_color: 17.0,
            bilateral_sigma_space: 17.0,
            canny_low: 30.0,
            canny_high: 200.0,
            yellow_lower: [15, 100, 100],
            yellow_upper: [35, 255, 255],
            max_contours: 10,
            min_aspect: 1.5,
            max_aspect: 7.0,
            max_angle: 45.0,
            padding: 5,
        }
    }
}

/// Tunables of the per-candidate crop enhancement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Crops tilted by at most this many degrees are not rotated
    pub deskew_min_angle: f32,
    /// CLAHE contrast clip limit
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis
    pub clahe_tile_grid: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            deskew_min_angle: 5.0,
            clahe_clip_limit: 3.0,
            clahe_tile_grid: 8,
        }
    }
}

/// ONNX model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding model files (platform data dir when unset)
    pub dir: Option<PathBuf>,
    /// Intra-op threads per ONNX session
    pub intra_threads: usize,
    /// Plate text recognizer
    pub recognizer: RecognizerModelConfig,
    /// Plate object detector (learned strategy)
    pub detector: DetectorModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            intra_threads: 4,
            recognizer: RecognizerModelConfig::default(),
            detector: DetectorModelConfig::default(),
        }
    }
}

/// CRNN text recognizer model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerModelConfig {
    /// Model filename inside the models directory
    pub file: String,
    /// Download location used when the file is missing
    pub url: Option<String>,
    /// Expected SHA-256 of the downloaded file
    pub sha256: Option<String>,
    /// One character per line; overrides `charset` when present
    pub dictionary_file: Option<String>,
    /// Output classes after the CTC blank
    pub charset: String,
    /// Model input height in pixels
    pub input_height: u32,
    /// Widest model input in pixels
    pub max_width: u32,
    /// Channel order the model was trained on
    pub channel_order: ChannelOrder,
}

impl Default for RecognizerModelConfig {
    fn default() -> Self {
        Self {
            file: "plate_rec.onnx".to_string(),
            url: None,
            sha256: None,
            dictionary_file: None,
            charset: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string(),
            input_height: 48,
            max_width: 320,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// YOLO-style plate detector model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorModelConfig {
    /// Model filename inside the models directory
    pub file: String,
    /// Download location used when the file is missing
    pub url: Option<String>,
    /// Expected SHA-256 of the downloaded file
    pub sha256: Option<String>,
    /// Square model input size in pixels
    pub input_size: u32,
    /// Minimum box score
    pub score_threshold: f32,
    /// Overlap above which the weaker box is suppressed
    pub iou_threshold: f32,
    /// Boxes kept per frame after suppression
    pub max_detections: usize,
}

impl Default for DetectorModelConfig {
    fn default() -> Self {
        Self {
            file: "plate_det.onnx".to_string(),
            url: None,
            sha256: None,
            input_size: 640,
            score_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 10,
        }
    }
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
    /// Largest accepted upload body in MiB
    pub max_upload_mb: usize,
    /// Close a live stream after this many idle seconds
    pub live_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            allowed_origins: vec![
                "http://localhost".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost:8000".to_string(),
                "http://127.0.0.1:5500".to_string(),
            ],
            max_upload_mb: 200,
            live_idle_timeout_secs: 30,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
