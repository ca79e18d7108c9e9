//! Plate rectangle geometry
//!
//! Contour measurements used by the detector and the candidate filter:
//! axis-aligned bounds, the minimum-area rotated rectangle and its
//! normalization into a [`PlateShape`].

use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

use crate::config::GeometricSettings;

/// Rotated rectangle in the legacy convention
///
/// `angle` lies in `[-90, 0)` and `width` is the side running along `angle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    pub center: (f32, f32),
    pub width: f32,
    pub height: f32,
    pub angle: f32,
}

/// Measured plate rectangle with `width >= height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateShape {
    pub width: f32,
    pub height: f32,
    /// Tilt of the long side in degrees
    pub angle: f32,
}

impl PlateShape {
    /// Orient a rectangle so its long side is the width
    ///
    /// A rectangle taller than wide is turned a quarter: sides swap and 90
    /// degrees are added to the angle.
    pub fn oriented(width: f32, height: f32, angle: f32) -> Self {
        if height > width {
            Self {
                width: height,
                height: width,
                angle: angle + 90.0,
            }
        } else {
            Self { width, height, angle }
        }
    }

    /// Width over height; zero for a degenerate rectangle
    pub fn aspect(&self) -> f32 {
        if self.height <= 0.0 {
            0.0
        } else {
            self.width / self.height
        }
    }
}

impl From<RotatedRect> for PlateShape {
    fn from(rect: RotatedRect) -> Self {
        PlateShape::oriented(rect.width, rect.height, rect.angle)
    }
}

/// Aspect and tilt limits a plate rectangle must satisfy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeConstraints {
    /// Exclusive lower aspect bound
    pub min_aspect: f32,
    /// Exclusive upper aspect bound
    pub max_aspect: f32,
    /// Inclusive absolute angle bound in degrees
    pub max_angle: f32,
}

impl Default for ShapeConstraints {
    fn default() -> Self {
        Self::from(&GeometricSettings::default())
    }
}

impl From<&GeometricSettings> for ShapeConstraints {
    fn from(settings: &GeometricSettings) -> Self {
        Self {
            min_aspect: settings.min_aspect,
            max_aspect: settings.max_aspect,
            max_angle: settings.max_angle,
        }
    }
}

impl ShapeConstraints {
    /// Whether the shape has plate-like proportions and tilt
    pub fn accepts(&self, shape: &PlateShape) -> bool {
        if shape.height <= 0.0 {
            return false;
        }
        let aspect = shape.aspect();
        aspect > self.min_aspect
            && aspect < self.max_aspect
            && shape.angle.abs() <= self.max_angle
    }
}

/// Axis-aligned pixel box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersect with a `frame_width` x `frame_height` frame
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> PixelBox {
        let x1 = self.x.min(frame_width);
        let y1 = self.y.min(frame_height);
        let x2 = self.x.saturating_add(self.width).min(frame_width);
        let y2 = self.y.saturating_add(self.height).min(frame_height);
        PixelBox::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Grow by `pad` on every side, staying inside the frame
    pub fn padded(&self, pad: u32, frame_width: u32, frame_height: u32) -> PixelBox {
        let x1 = self.x.saturating_sub(pad);
        let y1 = self.y.saturating_sub(pad);
        let x2 = self
            .x
            .saturating_add(self.width)
            .saturating_add(pad)
            .min(frame_width);
        let y2 = self
            .y
            .saturating_add(self.height)
            .saturating_add(pad)
            .min(frame_height);
        PixelBox::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

/// Smallest axis-aligned box covering every contour pixel
pub fn bounding_box(points: &[Point<i32>]) -> Option<PixelBox> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;

    Some(PixelBox::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

/// Minimum-area enclosing rectangle of a point set
///
/// Rotating calipers over the convex hull: the optimal rectangle has one side
/// collinear with a hull edge.
pub fn min_area_rect(points: &[Point<i32>]) -> Option<RotatedRect> {
    if points.is_empty() {
        return None;
    }

    let hull = convex_hull(points.to_vec());
    if hull.len() <= 1 {
        let p = hull.first().copied().unwrap_or(points[0]);
        return Some(RotatedRect {
            center: (p.x as f32, p.y as f32),
            width: 0.0,
            height: 0.0,
            angle: -90.0,
        });
    }

    let pts: Vec<(f64, f64)> = hull.iter().map(|p| (p.x as f64, p.y as f64)).collect();

    // (area, unit edge direction, extents along and across the edge)
    let mut best: Option<(f64, (f64, f64), (f64, f64), (f64, f64))> = None;

    for i in 0..pts.len() {
        let (ax, ay) = pts[i];
        let (bx, by) = pts[(i + 1) % pts.len()];
        let (dx, dy) = (bx - ax, by - ay);
        let len = (dx * dx + dy * dy).sqrt();
        if len < f64::EPSILON {
            continue;
        }
        let u = (dx / len, dy / len);
        let n = (-u.1, u.0);

        let mut along = (f64::INFINITY, f64::NEG_INFINITY);
        let mut across = (f64::INFINITY, f64::NEG_INFINITY);
        for &(px, py) in &pts {
            let a = px * u.0 + py * u.1;
            let c = px * n.0 + py * n.1;
            along = (along.0.min(a), along.1.max(a));
            across = (across.0.min(c), across.1.max(c));
        }

        let area = (along.1 - along.0) * (across.1 - across.0);
        if best.map_or(true, |(best_area, ..)| area < best_area - 1e-9) {
            best = Some((area, u, along, across));
        }
    }

    let (_, u, along, across) = best?;
    let n = (-u.1, u.0);
    let mid_along = (along.0 + along.1) / 2.0;
    let mid_across = (across.0 + across.1) / 2.0;
    let center = (
        u.0 * mid_along + n.0 * mid_across,
        u.1 * mid_along + n.1 * mid_across,
    );

    let edge_len = (along.1 - along.0) as f32;
    let cross_len = (across.1 - across.0) as f32;
    let mut theta = normalize_angle(u.1.atan2(u.0).to_degrees() as f32);
    if theta >= 90.0 {
        theta -= 180.0;
    }

    // Width is the side whose direction falls in [-90, 0)
    let (width, height, angle) = if theta < 0.0 {
        (edge_len, cross_len, theta)
    } else {
        (cross_len, edge_len, theta - 90.0)
    };

    Some(RotatedRect {
        center: (center.0 as f32, center.1 as f32),
        width,
        height,
        angle,
    })
}

/// Fold a direction angle into `[-90, 90)`
fn normalize_angle(degrees: f32) -> f32 {
    (degrees + 90.0).rem_euclid(180.0) - 90.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotated_corners(cx: f32, cy: f32, w: f32, h: f32, degrees: f32) -> Vec<Point<i32>> {
        let (s, c) = degrees.to_radians().sin_cos();
        [(-w / 2.0, -h / 2.0), (w / 2.0, -h / 2.0), (w / 2.0, h / 2.0), (-w / 2.0, h / 2.0)]
            .iter()
            .map(|&(x, y)| {
                Point::new(
                    (cx + x * c - y * s).round() as i32,
                    (cy + x * s + y * c).round() as i32,
                )
            })
            .collect()
    }

    #[test]
    fn test_min_area_rect_ignores_interior_points() {
        let mut points = rotated_corners(100.0, 60.0, 120.0, 40.0, 0.0);
        points.extend([Point::new(100, 60), Point::new(80, 55), Point::new(100, 60)]);
        let shape = PlateShape::from(min_area_rect(&points).unwrap());

        assert!((shape.width - 120.0).abs() < 1.5, "{:?}", shape);
        assert!((shape.height - 40.0).abs() < 1.5, "{:?}", shape);
    }

    #[test]
    fn test_bounding_box_is_inclusive() {
        let points = vec![Point::new(3, 4), Point::new(12, 4), Point::new(12, 9)];
        assert_eq!(bounding_box(&points), Some(PixelBox::new(3, 4, 10, 6)));
        assert_eq!(bounding_box(&[]), None);
    }

    #[test]
    fn test_min_area_rect_axis_aligned() {
        let corners = rotated_corners(100.0, 50.0, 90.0, 30.0, 0.0);
        let rect = min_area_rect(&corners).unwrap();
        let shape = PlateShape::from(rect);

        assert!((shape.width - 90.0).abs() < 1.5);
        assert!((shape.height - 30.0).abs() < 1.5);
        assert!(shape.angle.abs() < 0.5);
        assert!((rect.center.0 - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_min_area_rect_tilted_both_ways() {
        let up = PlateShape::from(min_area_rect(&rotated_corners(200.0, 200.0, 150.0, 50.0, 10.0)).unwrap());
        assert!((up.angle - 10.0).abs() < 1.5, "angle {}", up.angle);
        assert!((up.aspect() - 3.0).abs() < 0.2);

        let down = PlateShape::from(min_area_rect(&rotated_corners(200.0, 200.0, 150.0, 50.0, -10.0)).unwrap());
        assert!((down.angle + 10.0).abs() < 1.5, "angle {}", down.angle);
    }

    #[test]
    fn test_min_area_rect_vertical_is_not_plate_like() {
        let rect = min_area_rect(&rotated_corners(100.0, 100.0, 30.0, 120.0, 0.0)).unwrap();
        let shape = PlateShape::from(rect);
        assert!(shape.width >= shape.height);
        assert!(shape.angle.abs() > 45.0);
        assert!(!ShapeConstraints::default().accepts(&shape));
    }

    #[test]
    fn test_legacy_angle_range() {
        for degrees in [-80.0f32, -30.0, 0.0, 25.0, 60.0] {
            let rect = min_area_rect(&rotated_corners(300.0, 300.0, 120.0, 40.0, degrees)).unwrap();
            assert!(rect.angle >= -90.0 && rect.angle < 0.0, "angle {}", rect.angle);
        }
    }

    #[test]
    fn test_oriented_swaps_tall_rectangles() {
        let shape = PlateShape::oriented(20.0, 60.0, 0.0);
        assert_eq!(shape.width, 60.0);
        assert_eq!(shape.height, 20.0);
        assert_eq!(shape.angle, 90.0);
    }

    #[test]
    fn test_shape_constraints_bounds() {
        let limits = ShapeConstraints::default();
        assert!(limits.accepts(&PlateShape { width: 100.0, height: 30.0, angle: 45.0 }));
        assert!(!limits.accepts(&PlateShape { width: 100.0, height: 30.0, angle: 45.5 }));
        // Both aspect bounds are exclusive
        assert!(!limits.accepts(&PlateShape { width: 75.0, height: 50.0, angle: 0.0 }));
        assert!(!limits.accepts(&PlateShape { width: 70.0, height: 10.0, angle: 0.0 }));
        assert!(!limits.accepts(&PlateShape { width: 70.0, height: 0.0, angle: 0.0 }));
    }

    #[test]
    fn test_padded_box_clamps_to_frame() {
        let b = PixelBox::new(2, 10, 50, 20);
        assert_eq!(b.padded(5, 200, 100), PixelBox::new(0, 5, 57, 30));
        assert_eq!(PixelBox::new(180, 90, 20, 10).padded(5, 200, 100), PixelBox::new(175, 85, 25, 15));
    }

    #[test]
    fn test_clamp_outside_frame_is_empty() {
        let b = PixelBox::new(300, 10, 40, 40).clamp_to(200, 100);
        assert_eq!(b.area(), 0);
        let b = PixelBox::new(190, 90, 40, 40).clamp_to(200, 100);
        assert_eq!(b, PixelBox::new(190, 90, 10, 10));
    }
}
