//! Candidate filter and normalizer
//!
//! Enforces plate proportions and tilt on every candidate, whatever detector
//! produced it, and keeps each box inside the frame.

use tracing::debug;

use super::detection::CandidateRegion;
use super::geometry::ShapeConstraints;
use crate::config::GeometricSettings;

/// Validates and clamps detector candidates
#[derive(Debug, Clone, Copy)]
pub struct CandidateFilter {
    constraints: ShapeConstraints,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::new(ShapeConstraints::default())
    }
}

impl CandidateFilter {
    pub fn new(constraints: ShapeConstraints) -> Self {
        Self { constraints }
    }

    pub fn from_settings(settings: &GeometricSettings) -> Self {
        Self::new(ShapeConstraints::from(settings))
    }

    /// Surviving candidates in input order
    ///
    /// A candidate passes when its measured shape is plate-like and its box
    /// keeps a positive area after clamping to the frame. Survivors are new
    /// values; the input is left untouched.
    pub fn normalize(&self, candidates: &[CandidateRegion], frame_width: u32, frame_height: u32) -> Vec<CandidateRegion> {
        candidates
            .iter()
            .filter_map(|candidate| {
                if !self.constraints.accepts(&candidate.shape) {
                    debug!(
                        "Filtered candidate {:?}: aspect={:.2} angle={:.1}",
                        candidate.bounds,
                        candidate.shape.aspect(),
                        candidate.shape.angle
                    );
                    return None;
                }

                let bounds = candidate.bounds.clamp_to(frame_width, frame_height);
                if bounds.area() == 0 {
                    debug!("Filtered candidate {:?}: empty after clamping", candidate.bounds);
                    return None;
                }

                Some(CandidateRegion {
                    bounds,
                    ..candidate.clone()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::geometry::{PixelBox, PlateShape};

    fn candidate(bounds: PixelBox, width: f32, height: f32, angle: f32) -> CandidateRegion {
        CandidateRegion {
            bounds,
            angle,
            shape: PlateShape { width, height, angle },
            confidence: None,
        }
    }

    #[test]
    fn test_keeps_plate_like_candidates_in_order() {
        let input = vec![
            candidate(PixelBox::new(10, 10, 100, 30), 100.0, 30.0, 3.0),
            candidate(PixelBox::new(0, 0, 40, 40), 40.0, 40.0, 0.0),
            candidate(PixelBox::new(50, 60, 80, 20), 80.0, 20.0, -12.0),
        ];

        let output = CandidateFilter::default().normalize(&input, 640, 480);
        assert_eq!(output.len(), 2);
        assert_eq!(output[0], input[0]);
        assert_eq!(output[1], input[2]);
    }

    #[test]
    fn test_rejects_steep_and_extreme_shapes() {
        let input = vec![
            candidate(PixelBox::new(0, 0, 100, 30), 100.0, 30.0, 46.0),
            candidate(PixelBox::new(0, 0, 100, 30), 100.0, 30.0, 90.0),
            candidate(PixelBox::new(0, 0, 100, 10), 100.0, 10.0, 0.0),
        ];
        assert!(CandidateFilter::default().normalize(&input, 640, 480).is_empty());
    }

    #[test]
    fn test_clamps_and_drops_empty_boxes() {
        let input = vec![
            candidate(PixelBox::new(600, 470, 100, 30), 100.0, 30.0, 0.0),
            candidate(PixelBox::new(700, 10, 100, 30), 100.0, 30.0, 0.0),
        ];

        let output = CandidateFilter::default().normalize(&input, 640, 480);
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].bounds, PixelBox::new(600, 470, 40, 10));
        // Shape measured by the detector is kept as is
        assert_eq!(output[0].shape, input[0].shape);
    }
}
