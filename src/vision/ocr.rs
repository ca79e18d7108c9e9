//! Text recognition interface and plate text validation

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::capture::ChannelOrder;

/// One text fragment read from a crop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextReading {
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TextReading {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Reads text fragments from an enhanced plate crop
pub trait TextRecognizer: Send + Sync {
    /// Readings in reading order; empty when nothing legible is found
    fn recognize(&self, crop: &RgbImage) -> anyhow::Result<Vec<TextReading>>;

    /// Channel order the recognizer expects its crops in
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }
}

/// Build plate text from readings, or `None` if it fails validation
///
/// Readings above `confidence_threshold` are joined in order, whitespace is
/// removed and letters are upper-cased. The result must have at least
/// `min_length` characters.
pub fn assemble_plate_text(readings: &[TextReading], confidence_threshold: f32, min_length: usize) -> Option<String> {
    let text: String = readings
        .iter()
        .filter(|r| r.confidence > confidence_threshold)
        .flat_map(|r| r.text.chars())
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    (text.chars().count() >= min_length).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_joins_confident_readings() {
        let readings = vec![
            TextReading::new("ab 12", 0.9),
            TextReading::new("zz", 0.3),
            TextReading::new("34c", 0.8),
        ];
        assert_eq!(assemble_plate_text(&readings, 0.5, 6), Some("AB1234C".to_string()));
    }

    #[test]
    fn test_threshold_is_strict() {
        let readings = vec![TextReading::new("ABC123", 0.5)];
        assert_eq!(assemble_plate_text(&readings, 0.5, 6), None);
    }

    #[test]
    fn test_too_short_is_rejected() {
        let readings = vec![TextReading::new("AB 12\t3", 0.99)];
        assert_eq!(assemble_plate_text(&readings, 0.5, 6), None);
        assert_eq!(assemble_plate_text(&readings, 0.5, 5), Some("AB123".to_string()));
        assert_eq!(assemble_plate_text(&[], 0.5, 1), None);
    }

    #[test]
    fn test_length_counts_characters() {
        let readings = vec![TextReading::new("äöü123", 0.9)];
        assert_eq!(assemble_plate_text(&readings, 0.5, 6), Some("ÄÖÜ123".to_string()));
    }
}
