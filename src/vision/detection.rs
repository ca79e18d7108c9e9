//! Plate region detection
//!
//! Two interchangeable strategies produce axis-aligned candidate regions:
//! a contour search over edge and yellow-color maps, and a trained object
//! detector behind the [`ObjectDetector`] trait.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::edges::canny;
use imageproc::filter::bilateral_filter;
use imageproc::geometry::contour_area;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::geometry::{bounding_box, min_area_rect, PixelBox, PlateShape, ShapeConstraints};
use super::object_detector::ObjectDetector;
use crate::capture::Frame;
use crate::config::{DetectorStrategy, GeometricSettings};
use crate::error::PlateError;

/// A frame region hypothesised to contain a plate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRegion {
    /// Axis-aligned box in frame pixels
    pub bounds: PixelBox,
    /// Tilt of the plate in degrees
    pub angle: f32,
    /// Measured plate rectangle the filter validates
    pub shape: PlateShape,
    /// Detector score (learned strategy only)
    pub confidence: Option<f32>,
}

/// Turns a frame into candidate plate regions
pub trait RegionDetector: Send + Sync {
    /// Candidates in detection order; empty when no plate is visible
    fn detect_candidates(&self, frame: &Frame) -> Result<Vec<CandidateRegion>, PlateError>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Select the detector for `strategy`
///
/// The learned strategy needs an object detector collaborator.
pub fn build_detector(
    strategy: DetectorStrategy,
    settings: &GeometricSettings,
    object_detector: Option<Arc<dyn ObjectDetector>>,
) -> Result<Box<dyn RegionDetector>, PlateError> {
    match strategy {
        DetectorStrategy::Geometric => Ok(Box::new(GeometricDetector::new(settings.clone()))),
        DetectorStrategy::Learned => {
            let detector = object_detector.ok_or_else(|| {
                PlateError::Config("learned strategy selected without an object detector model".into())
            })?;
            Ok(Box::new(LearnedDetector::new(detector)))
        }
    }
}

fn ensure_non_empty(frame: &Frame) -> Result<(), PlateError> {
    if frame.is_empty() {
        return Err(PlateError::InvalidFrame(format!(
            "frame has zero area ({}x{})",
            frame.width(),
            frame.height()
        )));
    }
    Ok(())
}

/// Edge and yellow-color contour search
pub struct GeometricDetector {
    settings: GeometricSettings,
    constraints: ShapeConstraints,
}

impl GeometricDetector {
    pub fn new(settings: GeometricSettings) -> Self {
        let constraints = ShapeConstraints::from(&settings);
        Self { settings, constraints }
    }

    /// Union of luminance edges and yellow-mask edges
    pub fn edge_map(&self, image: &RgbImage) -> GrayImage {
        let s = &self.settings;
        if image.width() == 0 || image.height() == 0 {
            return GrayImage::new(image.width(), image.height());
        }

        let gray = luma_bt601(image);
        let smoothed = bilateral_filter(&gray, s.bilateral_diameter, s.bilateral_sigma_color, s.bilateral_sigma_space);
        let mut edges = canny(&smoothed, s.canny_low, s.canny_high);

        let mask = hsv_in_range(image, s.yellow_lower, s.yellow_upper);
        let mask_edges = canny(&mask, s.canny_low, s.canny_high);

        for (e, m) in edges.pixels_mut().zip(mask_edges.pixels()) {
            e.0[0] = e.0[0].max(m.0[0]);
        }
        edges
    }
}

impl RegionDetector for GeometricDetector {
    fn detect_candidates(&self, frame: &Frame) -> Result<Vec<CandidateRegion>, PlateError> {
        ensure_non_empty(frame)?;
        let start = Instant::now();
        let (width, height) = frame.dimensions();

        let edges = self.edge_map(frame.image());

        // Hole borders retrace the inside of an edge ring already found as an outer border
        let mut contours: Vec<(f64, Vec<imageproc::point::Point<i32>>)> = find_contours::<i32>(&edges)
            .into_iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer))
            .map(|c| (contour_area(&c.points), c.points))
            .collect();

        contours.sort_by(|a, b| b.0.total_cmp(&a.0));
        contours.truncate(self.settings.max_contours);

        let mut candidates = Vec::new();
        for (area, points) in &contours {
            if points.len() < 3 {
                continue;
            }
            let Some(rect) = min_area_rect(points) else {
                continue;
            };
            let shape = PlateShape::from(rect);

            if !self.constraints.accepts(&shape) {
                debug!(
                    "Rejected contour: area={:.0} aspect={:.2} angle={:.1}",
                    area,
                    shape.aspect(),
                    shape.angle
                );
                continue;
            }

            let Some(bounds) = bounding_box(points) else {
                continue;
            };
            let bounds = bounds.padded(self.settings.padding, width, height);
            if bounds.area() == 0 {
                continue;
            }

            candidates.push(CandidateRegion {
                bounds,
                angle: shape.angle,
                shape,
                confidence: None,
            });
        }

        debug!(
            "Geometric detector: {} contours examined, {} candidates in {:?}",
            contours.len(),
            candidates.len(),
            start.elapsed()
        );

        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "geometric"
    }
}

/// Candidates from a trained plate detector
pub struct LearnedDetector {
    detector: Arc<dyn ObjectDetector>,
}

impl LearnedDetector {
    pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
        Self { detector }
    }
}

impl RegionDetector for LearnedDetector {
    fn detect_candidates(&self, frame: &Frame) -> Result<Vec<CandidateRegion>, PlateError> {
        ensure_non_empty(frame)?;
        let start = Instant::now();
        let (width, height) = frame.dimensions();

        let boxes = self
            .detector
            .detect(frame)
            .map_err(|e| PlateError::Detector(format!("{:#}", e)))?;

        let candidates: Vec<CandidateRegion> = boxes
            .iter()
            .filter_map(|b| {
                let bounds = b.to_pixel_box().clamp_to(width, height);
                if bounds.area() == 0 {
                    debug!("Dropping empty detector box {:?}", b);
                    return None;
                }
                Some(CandidateRegion {
                    bounds,
                    angle: 0.0,
                    shape: PlateShape::oriented(bounds.width as f32, bounds.height as f32, 0.0),
                    confidence: Some(b.confidence),
                })
            })
            .collect();

        debug!(
            "Learned detector: {} boxes, {} candidates in {:?}",
            boxes.len(),
            candidates.len(),
            start.elapsed()
        );

        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "learned"
    }
}

/// BT.601 luma
pub fn luma_bt601(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());
    for (g, p) in gray.pixels_mut().zip(image.pixels()) {
        let [r, gr, b] = p.0;
        let y = (299 * r as u32 + 587 * gr as u32 + 114 * b as u32 + 500) / 1000;
        *g = Luma([y as u8]);
    }
    gray
}

/// RGB to HSV on the 8-bit scale (H 0-180, S and V 0-255)
pub fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(180.0) as u8,
        s.round().clamp(0.0, 255.0) as u8,
        v as u8,
    ]
}

/// Binary mask (255 inside) of pixels whose HSV lies within `[lower, upper]`
pub fn hsv_in_range(image: &RgbImage, lower: [u8; 3], upper: [u8; 3]) -> GrayImage {
    let mut mask = GrayImage::new(image.width(), image.height());
    for (m, p) in mask.pixels_mut().zip(image.pixels()) {
        let [r, g, b] = p.0;
        let hsv = rgb_to_hsv8(r, g, b);
        let inside = (0..3).all(|i| hsv[i] >= lower[i] && hsv[i] <= upper[i]);
        *m = Luma([if inside { 255 } else { 0 }]);
    }
    mask
}

/// Corners of a `size` rectangle centred on `center`, turned by `degrees`
#[cfg(test)]
pub(crate) fn rotated_quad(center: (f32, f32), size: (f32, f32), degrees: f32) -> Vec<imageproc::point::Point<i32>> {
    let (s, c) = degrees.to_radians().sin_cos();
    let (hw, hh) = (size.0 / 2.0, size.1 / 2.0);
    [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)]
        .iter()
        .map(|&(x, y)| {
            imageproc::point::Point::new(
                (center.0 + x * c - y * s).round() as i32,
                (center.1 + x * s + y * c).round() as i32,
            )
        })
        .collect()
}

/// Frame with one bright tilted rectangle on a dark background
#[cfg(test)]
pub(crate) fn synthetic_plate_frame(
    width: u32,
    height: u32,
    center: (f32, f32),
    plate: (f32, f32),
    degrees: f32,
) -> Frame {
    use image::Rgb;
    use imageproc::drawing::draw_polygon_mut;

    let mut image = RgbImage::from_pixel(width, height, Rgb([60, 60, 60]));
    draw_polygon_mut(&mut image, &rotated_quad(center, plate, degrees), Rgb([220, 220, 220]));
    Frame::new(image)
}

/// Like [`synthetic_plate_frame`] with seven dark character strokes on the plate
#[cfg(test)]
pub(crate) fn lettered_plate_frame(
    width: u32,
    height: u32,
    center: (f32, f32),
    plate: (f32, f32),
    degrees: f32,
) -> Frame {
    use image::Rgb;
    use imageproc::drawing::draw_polygon_mut;

    let mut image = synthetic_plate_frame(width, height, center, plate, degrees).into_image();
    let (s, c) = degrees.to_radians().sin_cos();
    let glyph = (plate.0 * 0.07, plate.1 * 0.56);
    let pitch = plate.0 / 8.0;
    for i in 0..7 {
        let offset = -plate.0 / 2.0 + pitch * (i + 1) as f32;
        let glyph_center = (center.0 + offset * c, center.1 + offset * s);
        draw_polygon_mut(&mut image, &rotated_quad(glyph_center, glyph, degrees), Rgb([25, 25, 25]));
    }
    Frame::new(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::object_detector::ObjectBox;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    struct ScriptedDetector(Vec<ObjectBox>);

    impl ObjectDetector for ScriptedDetector {
        fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<ObjectBox>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl ObjectDetector for FailingDetector {
        fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<ObjectBox>> {
            anyhow::bail!("session closed")
        }
    }

    fn geometric() -> GeometricDetector {
        GeometricDetector::new(GeometricSettings::default())
    }

    #[test]
    fn test_rgb_to_hsv8() {
        assert_eq!(rgb_to_hsv8(0, 0, 0), [0, 0, 0]);
        assert_eq!(rgb_to_hsv8(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv8(0, 255, 0), [60, 255, 255]);
        // Plate yellow sits near H=25 on the half-degree scale
        let yellow = rgb_to_hsv8(230, 190, 30);
        assert!((15..=35).contains(&yellow[0]), "hue {}", yellow[0]);
        assert!(yellow[1] >= 100 && yellow[2] >= 100);
    }

    #[test]
    fn test_hsv_in_range_yellow() {
        let mut image = RgbImage::from_pixel(4, 1, Rgb([128, 128, 128]));
        image.put_pixel(1, 0, Rgb([230, 190, 30]));
        image.put_pixel(2, 0, Rgb([30, 60, 230]));

        let mask = hsv_in_range(&image, [15, 100, 100], [35, 255, 255]);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 0).0[0], 255);
        assert_eq!(mask.get_pixel(2, 0).0[0], 0);
    }

    #[test]
    fn test_blank_frame_has_no_candidates() {
        let frame = Frame::new(RgbImage::from_pixel(200, 120, Rgb([90, 90, 90])));
        let candidates = geometric().detect_candidates(&frame).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_zero_area_frame_is_invalid() {
        let frame = Frame::new(RgbImage::new(0, 0));
        let result = geometric().detect_candidates(&frame);
        assert!(matches!(result, Err(PlateError::InvalidFrame(_))));
    }

    #[test]
    fn test_tilted_plate_is_found() {
        let frame = synthetic_plate_frame(400, 300, (200.0, 150.0), (150.0, 50.0), 10.0);
        let candidates = geometric().detect_candidates(&frame).unwrap();

        assert_eq!(candidates.len(), 1, "{:?}", candidates);
        let c = &candidates[0];
        assert!((c.angle - 10.0).abs() < 2.0, "angle {}", c.angle);
        assert!(c.shape.aspect() > 2.5 && c.shape.aspect() < 3.5);
        assert!(c.confidence.is_none());

        // Rotated plate half extents are 78.2 x 37.6, plus 5 px padding
        assert!((c.bounds.x as i32 - 117).abs() <= 3, "{:?}", c.bounds);
        assert!((c.bounds.y as i32 - 107).abs() <= 3, "{:?}", c.bounds);
        assert!((c.bounds.width as i32 - 168).abs() <= 4, "{:?}", c.bounds);
        assert!((c.bounds.height as i32 - 86).abs() <= 4, "{:?}", c.bounds);
    }

    #[test]
    fn test_vertical_rectangle_is_rejected() {
        let frame = synthetic_plate_frame(300, 300, (150.0, 150.0), (40.0, 160.0), 0.0);
        let candidates = geometric().detect_candidates(&frame).unwrap();
        assert!(candidates.is_empty(), "{:?}", candidates);
    }

    #[test]
    fn test_yellow_plate_on_similar_luma_background() {
        // Luma contrast is weak; the yellow mask still outlines the plate
        let mut image = RgbImage::from_pixel(300, 200, Rgb([170, 170, 170]));
        draw_filled_rect_mut(&mut image, Rect::at(90, 80).of_size(120, 36), Rgb([220, 180, 20]));
        let candidates = geometric().detect_candidates(&Frame::new(image)).unwrap();

        assert_eq!(candidates.len(), 1, "{:?}", candidates);
        assert!(candidates[0].angle.abs() < 1.0);
    }

    #[test]
    fn test_keeps_the_ten_largest_contours() {
        // Fifteen 3:1 rectangles, each strictly larger than the previous one
        let mut image = RgbImage::from_pixel(640, 480, Rgb([50, 50, 50]));
        let mut rects = Vec::new();
        for i in 0..15u32 {
            let rect = Rect::at(20 + (i % 3) as i32 * 210, 20 + (i / 3) as i32 * 92).of_size(60 + 6 * i, 20 + 2 * i);
            draw_filled_rect_mut(&mut image, rect, Rgb([230, 230, 230]));
            rects.push(rect);
        }

        let candidates = geometric().detect_candidates(&Frame::new(image)).unwrap();
        assert_eq!(candidates.len(), 10, "{:?}", candidates);

        let mut found: Vec<usize> = candidates
            .iter()
            .map(|c| {
                let cx = c.bounds.x + c.bounds.width / 2;
                let cy = c.bounds.y + c.bounds.height / 2;
                rects
                    .iter()
                    .position(|r| {
                        (r.left()..=r.right()).contains(&(cx as i32)) && (r.top()..=r.bottom()).contains(&(cy as i32))
                    })
                    .unwrap()
            })
            .collect();
        found.sort_unstable();
        assert_eq!(found, (5..15).collect::<Vec<_>>());
    }

    #[test]
    fn test_character_strokes_are_not_candidates() {
        let frame = lettered_plate_frame(400, 300, (200.0, 150.0), (150.0, 50.0), 10.0);
        let candidates = geometric().detect_candidates(&frame).unwrap();

        assert_eq!(candidates.len(), 1, "{:?}", candidates);
        assert!((candidates[0].angle - 10.0).abs() < 2.0);
        assert!(candidates[0].shape.aspect() > 2.5);
    }

    #[test]
    fn test_learned_detector_candidates() {
        let detector = LearnedDetector::new(Arc::new(ScriptedDetector(vec![
            ObjectBox::new(10.0, 20.0, 90.0, 30.0, 0.9),
            // Tall box: shape turned a quarter
            ObjectBox::new(150.0, 10.0, 20.0, 60.0, 0.8),
            // Entirely outside the frame
            ObjectBox::new(500.0, 500.0, 40.0, 20.0, 0.7),
            // Overhangs the right edge
            ObjectBox::new(180.0, 90.0, 60.0, 20.0, 0.6),
        ])));
        let frame = Frame::new(RgbImage::new(200, 100));

        let candidates = detector.detect_candidates(&frame).unwrap();
        assert_eq!(candidates.len(), 3);

        assert_eq!(candidates[0].bounds, PixelBox::new(10, 20, 90, 30));
        assert_eq!(candidates[0].angle, 0.0);
        assert_eq!(candidates[0].confidence, Some(0.9));

        assert_eq!(candidates[1].shape.angle, 90.0);
        assert_eq!(candidates[2].bounds, PixelBox::new(180, 90, 20, 10));
    }

    #[test]
    fn test_learned_detector_failure() {
        let detector = LearnedDetector::new(Arc::new(FailingDetector));
        let frame = Frame::new(RgbImage::new(20, 20));
        assert!(matches!(detector.detect_candidates(&frame), Err(PlateError::Detector(_))));
    }

    #[test]
    fn test_build_detector() {
        let settings = GeometricSettings::default();
        let detector = build_detector(DetectorStrategy::Geometric, &settings, None).unwrap();
        assert_eq!(detector.name(), "geometric");

        assert!(matches!(
            build_detector(DetectorStrategy::Learned, &settings, None),
            Err(PlateError::Config(_))
        ));

        let scripted: Arc<dyn ObjectDetector> = Arc::new(ScriptedDetector(Vec::new()));
        let detector = build_detector(DetectorStrategy::Learned, &settings, Some(scripted)).unwrap();
        assert_eq!(detector.name(), "learned");
    }
}
