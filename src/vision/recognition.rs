//! CRNN plate text recognizer
//!
//! Runs a CTC-trained recognition model through ONNX Runtime and greedy-decodes
//! its per-timestep class scores.

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array4, ArrayViewD, IxDyn};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::models::OnnxSession;
use super::ocr::{TextReading, TextRecognizer};
use super::preprocess::{hwc_to_nchw, image_to_f32, normalize, resize_for_recognition};
use crate::capture::ChannelOrder;
use crate::config::RecognizerModelConfig;

/// Narrowest recognizer input
const MIN_INPUT_WIDTH: u32 = 8;

/// ONNX CRNN recognizer
pub struct CrnnRecognizer {
    session: Mutex<OnnxSession>,
    input_name: String,
    /// Class `i + 1` decodes to `vocabulary[i]`; class 0 is the CTC blank
    vocabulary: Vec<char>,
    input_height: u32,
    max_width: u32,
    channel_order: ChannelOrder,
}

impl CrnnRecognizer {
    /// Load the model and its vocabulary
    ///
    /// The dictionary file, when given, replaces the configured charset.
    pub fn load(
        model_path: &Path,
        dictionary: Option<&Path>,
        config: &RecognizerModelConfig,
        intra_threads: usize,
    ) -> Result<Self> {
        let vocabulary = match dictionary {
            Some(path) => load_vocabulary(path)?,
            None => config.charset.chars().collect(),
        };
        if vocabulary.is_empty() {
            anyhow::bail!("Recognizer vocabulary is empty");
        }

        let session = OnnxSession::new(model_path, intra_threads)?;
        let input_name = session.first_input()?.to_string();
        debug!("Recognizer outputs: {:?}", session.output_names());
        info!("Loaded plate recognizer with {} classes", vocabulary.len());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            vocabulary,
            input_height: config.input_height,
            max_width: config.max_width,
            channel_order: config.channel_order,
        })
    }

    /// Build the normalized `[1, 3, H, W]` input tensor for a crop
    pub fn input_tensor(&self, crop: &RgbImage) -> Array4<f32> {
        let resized = resize_for_recognition(&image_to_f32(crop), self.input_height, self.max_width, MIN_INPUT_WIDTH);
        hwc_to_nchw(&normalize(&resized, &[0.5; 3], &[0.5; 3]))
    }
}

impl TextRecognizer for CrnnRecognizer {
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<TextReading>> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(Vec::new());
        }
        let input = self.input_tensor(crop);

        let mut session = self.session.lock();
        let input_value = Value::from_array(input).context("Failed to create input tensor")?;
        let outputs = session
            .session_mut()
            .run(ort::inputs![&self.input_name => input_value])
            .context("Recognition inference failed")?;

        let scores = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        let reading = ctc_greedy_decode(scores, &self.vocabulary)?;
        Ok(reading.into_iter().collect())
    }

    fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }
}

/// Read one character per non-empty line
pub fn load_vocabulary(path: &Path) -> Result<Vec<char>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {:?}", path))?;
    Ok(content
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').chars().next())
        .collect())
}

/// Greedy CTC decoding of `[1, T, C]` or `[T, C]` scores
///
/// Repeated classes collapse and blanks (class 0) separate characters. The
/// confidence is the mean probability of the emitted characters. Rows that are
/// not probability distributions are softmaxed first.
pub fn ctc_greedy_decode(scores: ArrayViewD<'_, f32>, vocabulary: &[char]) -> Result<Option<TextReading>> {
    let shape = scores.shape().to_vec();
    let (steps, classes) = match shape.as_slice() {
        [1, t, c] => (*t, *c),
        [t, c] => (*t, *c),
        other => anyhow::bail!("Unexpected recognizer output shape: {:?}", other),
    };

    let mut text = String::new();
    let mut total = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for t in 0..steps {
        let row: Vec<f32> = (0..classes)
            .map(|c| {
                if shape.len() == 3 {
                    scores[IxDyn(&[0, t, c])]
                } else {
                    scores[IxDyn(&[t, c])]
                }
            })
            .collect();
        let probs = as_probabilities(row);

        let (best, prob) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        if best != 0 && best != previous {
            if let Some(&ch) = vocabulary.get(best - 1) {
                text.push(ch);
                total += prob;
                emitted += 1;
            }
        }
        previous = best;
    }

    if emitted == 0 {
        return Ok(None);
    }
    Ok(Some(TextReading::new(text, (total / emitted as f32).clamp(0.0, 1.0))))
}

fn as_probabilities(row: Vec<f32>) -> Vec<f32> {
    let is_distribution = row.iter().all(|&v| (0.0..=1.0).contains(&v))
        && (row.iter().sum::<f32>() - 1.0).abs() < 1e-3;
    if is_distribution {
        return row;
    }
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
