//! Tensor preprocessing for the ONNX models
//!
//! Handles image resizing, normalization, and tensor conversion for the plate
//! detector and the CRNN text recognizer.

use image::RgbImage;
use ndarray::{Array3, Array4};

/// Padding value YOLO-style detectors are trained with (114 / 255)
pub const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Convert an 8-bit three-channel image to an HWC f32 array in `[0, 1]`
///
/// Channels are copied in buffer order, so a crop already permuted for the
/// recognizer keeps that order.
pub fn image_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut out = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            out[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }

    out
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Bilinear sample of an HWC array at fractional source coordinates
fn bilinear(image: &Array3<f32>, src_x: f32, src_y: f32, ch: usize) -> f32 {
    let (h, w, _) = image.dim();
    let src_x = src_x.clamp(0.0, (w - 1) as f32);
    let src_y = src_y.clamp(0.0, (h - 1) as f32);

    let y0 = src_y.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x0 = src_x.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);

    let fy = src_y - y0 as f32;
    let fx = src_x - x0 as f32;

    let v0 = image[[y0, x0, ch]] * (1.0 - fx) + image[[y0, x1, ch]] * fx;
    let v1 = image[[y1, x0, ch]] * (1.0 - fx) + image[[y1, x1, ch]] * fx;
    v0 * (1.0 - fy) + v1 * fy
}

/// Fit the image into a `target_size` square, keeping aspect ratio
///
/// The resized image is anchored at the top-left corner and the remainder is
/// filled with [`LETTERBOX_FILL`]. Returns (letterboxed image, scale factor).
pub fn letterbox(image: &Array3<f32>, target_size: u32) -> (Array3<f32>, f32) {
    let (h, w, c) = image.dim();
    let target = target_size as usize;
    let mut boxed = Array3::<f32>::from_elem((target, target, c), LETTERBOX_FILL);
    if h == 0 || w == 0 {
        return (boxed, 1.0);
    }

    let scale = target_size as f32 / (h.max(w) as f32);
    let new_h = ((h as f32 * scale).round() as usize).clamp(1, target);
    let new_w = ((w as f32 * scale).round() as usize).clamp(1, target);

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 + 0.5) / scale - 0.5;
            let src_x = (x as f32 + 0.5) / scale - 0.5;
            for ch in 0..c {
                boxed[[y, x, ch]] = bilinear(image, src_x, src_y, ch);
            }
        }
    }

    (boxed, scale)
}

/// Resize image for recognition model (fixed height, variable width)
pub fn resize_for_recognition(
    image: &Array3<f32>,
    target_height: u32,
    max_width: u32,
    min_width: u32,
) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let new_h = target_height as usize;
    if h == 0 || w == 0 {
        return Array3::<f32>::zeros((new_h, min_width.max(1) as usize, c));
    }

    let scale = target_height as f32 / h as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(min_width.max(1), max_width.max(min_width.max(1))) as usize;
    let scale_x = new_w as f32 / w as f32;

    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));
    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 + 0.5) / scale - 0.5;
            let src_x = (x as f32 + 0.5) / scale_x - 0.5;
            for ch in 0..c {
                resized[[y, x, ch]] = bilinear(image, src_x, src_y, ch);
            }
        }
    }

    resized
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_image_to_f32() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 128]));

        let arr = image_to_f32(&image);

        assert_eq!(arr.dim(), (1, 2, 3));
        assert!((arr[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(arr[[0, 0, 1]].abs() < 0.01);
        assert!((arr[[0, 1, 1]] - 1.0).abs() < 0.01);
        assert!((arr[[0, 1, 2]] - 0.502).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize_to_unit_range() {
        let image = Array3::<f32>::from_shape_fn((1, 2, 3), |(_, x, _)| x as f32);
        let normalized = normalize(&image, &[0.5; 3], &[0.5; 3]);

        assert!((normalized[[0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((normalized[[0, 1, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_wide_image() {
        let image = Array3::<f32>::from_elem((50, 100, 3), 1.0);
        let (boxed, scale) = letterbox(&image, 64);

        assert_eq!(boxed.dim(), (64, 64, 3));
        assert!((scale - 0.64).abs() < 1e-6);
        assert!((boxed[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((boxed[[31, 63, 0]] - 1.0).abs() < 1e-6);
        // Below the resized content is padding
        assert!((boxed[[40, 10, 0]] - LETTERBOX_FILL).abs() < 1e-6);
    }

    #[test]
    fn test_resize_for_recognition_caps_width() {
        let wide = Array3::<f32>::zeros((10, 500, 3));
        assert_eq!(resize_for_recognition(&wide, 48, 320, 8).dim(), (48, 320, 3));

        let narrow = Array3::<f32>::zeros((100, 4, 3));
        assert_eq!(resize_for_recognition(&narrow, 48, 320, 8).dim(), (48, 8, 3));

        let plate = Array3::<f32>::zeros((30, 100, 3));
        assert_eq!(resize_for_recognition(&plate, 48, 320, 8).dim(), (48, 160, 3));
    }
}
