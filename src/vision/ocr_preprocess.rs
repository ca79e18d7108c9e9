//! Crop enhancement before text recognition
//!
//! Cuts the candidate box out of the frame, rotates tilted plates level and
//! boosts local contrast with CLAHE on the lightness channel.

use image::{GrayImage, Luma, Rgb, RgbImage};
use tracing::debug;

use super::detection::CandidateRegion;
use crate::capture::{ChannelOrder, Frame};
use crate::config::PreprocessSettings;

/// Prepares candidate crops for the recognizer
#[derive(Debug, Clone, Default)]
pub struct RegionPreprocessor {
    settings: PreprocessSettings,
}

impl RegionPreprocessor {
    pub fn new(settings: PreprocessSettings) -> Self {
        Self { settings }
    }

    /// Enhanced crop in `order`, or `None` when the box covers no pixels
    pub fn prepare(&self, frame: &Frame, candidate: &CandidateRegion, order: ChannelOrder) -> Option<RgbImage> {
        let crop = crop_region(frame, candidate)?;
        let level = self.deskew(&crop, candidate.angle);
        let enhanced = clahe_lightness(&level, self.settings.clahe_clip_limit, self.settings.clahe_tile_grid);
        Some(reorder_channels(enhanced, order))
    }

    /// Rotate `crop` level when it is tilted beyond the threshold
    pub fn deskew(&self, crop: &RgbImage, angle: f32) -> RgbImage {
        if angle.abs() <= self.settings.deskew_min_angle {
            return crop.clone();
        }
        debug!("De-skewing {}x{} crop by {:.1} degrees", crop.width(), crop.height(), angle);
        rotate_bicubic(crop, angle)
    }
}

/// Copy of the candidate box, clamped to the frame
pub fn crop_region(frame: &Frame, candidate: &CandidateRegion) -> Option<RgbImage> {
    let (width, height) = frame.dimensions();
    let b = candidate.bounds.clamp_to(width, height);
    if b.area() == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(frame.image(), b.x, b.y, b.width, b.height).to_image())
}

/// Swap red and blue for blue-first recognizers
pub fn reorder_channels(mut image: RgbImage, order: ChannelOrder) -> RgbImage {
    if order.is_blue_first() {
        for pixel in image.pixels_mut() {
            pixel.0.swap(0, 2);
        }
    }
    image
}

/// Rotate about the crop centre so a line tilted by `degrees` becomes level
///
/// Same output size, bicubic sampling, edge pixels replicated outwards.
pub fn rotate_bicubic(image: &RgbImage, degrees: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let cx = (width / 2) as f32;
    let cy = (height / 2) as f32;
    let (sin, cos) = degrees.to_radians().sin_cos();

    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cx + dx * cos - dy * sin;
        let sy = cy + dx * sin + dy * cos;
        *pixel = sample_bicubic(image, sx, sy);
    }
    out
}

fn cubic_weight(t: f32) -> f32 {
    const A: f32 = -0.75;
    let t = t.abs();
    if t <= 1.0 {
        ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((A * t - 5.0 * A) * t + 8.0 * A) * t - 4.0 * A
    } else {
        0.0
    }
}

fn sample_bicubic(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let wx: [f32; 4] = std::array::from_fn(|i| cubic_weight(fx - (i as f32 - 1.0)));
    let wy: [f32; 4] = std::array::from_fn(|i| cubic_weight(fy - (i as f32 - 1.0)));

    let mut acc = [0.0f32; 3];
    for (j, wyj) in wy.iter().enumerate() {
        let sy = (y0 + j as i32 - 1).clamp(0, max_y) as u32;
        for (i, wxi) in wx.iter().enumerate() {
            let sx = (x0 + i as i32 - 1).clamp(0, max_x) as u32;
            let p = image.get_pixel(sx, sy).0;
            let w = wxi * wyj;
            for c in 0..3 {
                acc[c] += p[c] as f32 * w;
            }
        }
    }

    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

/// CLAHE on the L* channel of CIE L*a*b*
pub fn clahe_lightness(image: &RgbImage, clip_limit: f32, tile_grid: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let lab: Vec<[f32; 3]> = image.pixels().map(|p| rgb_to_lab(p.0)).collect();

    let mut lightness = GrayImage::new(width, height);
    for (l, px) in lightness.pixels_mut().zip(&lab) {
        *l = Luma([(px[0] * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8]);
    }

    let equalized = clahe(&lightness, clip_limit, tile_grid);

    let mut out = RgbImage::new(width, height);
    for ((o, l), px) in out.pixels_mut().zip(equalized.pixels()).zip(&lab) {
        let lightness = l.0[0] as f32 * 100.0 / 255.0;
        *o = Rgb(lab_to_rgb([lightness, px[1], px[2]]));
    }
    out
}

/// Contrast-limited adaptive histogram equalization
///
/// Per-tile histograms are clipped at `clip_limit` times the mean bin height,
/// the excess is spread over all bins, and pixels interpolate bilinearly
/// between the four nearest tile mappings.
pub fn clahe(image: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let tiles_x = tile_grid.clamp(1, width) as usize;
    let tiles_y = tile_grid.clamp(1, height) as usize;
    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    let tile_of = |v: u32, size: f32, count: usize| ((v as f32 / size) as usize).min(count - 1);

    let mut histograms = vec![[0u32; 256]; tiles_x * tiles_y];
    let mut areas = vec![0u32; tiles_x * tiles_y];
    for (x, y, p) in image.enumerate_pixels() {
        let t = tile_of(y, tile_h, tiles_y) * tiles_x + tile_of(x, tile_w, tiles_x);
        histograms[t][p.0[0] as usize] += 1;
        areas[t] += 1;
    }

    let luts: Vec<[u8; 256]> = histograms
        .iter()
        .zip(&areas)
        .map(|(hist, &area)| clipped_equalization(hist, area, clip_limit))
        .collect();

    let mut out = GrayImage::new(width, height);
    for (x, y, p) in image.enumerate_pixels() {
        let v = p.0[0] as usize;

        let txf = (x as f32 + 0.5) / tile_w - 0.5;
        let tyf = (y as f32 + 0.5) / tile_h - 0.5;
        let tx1 = txf.floor();
        let ty1 = tyf.floor();
        let xa = txf - tx1;
        let ya = tyf - ty1;

        let clamp_x = |t: f32| (t.max(0.0) as usize).min(tiles_x - 1);
        let clamp_y = |t: f32| (t.max(0.0) as usize).min(tiles_y - 1);
        let (x1, x2) = (clamp_x(tx1), clamp_x(tx1 + 1.0));
        let (y1, y2) = (clamp_y(ty1), clamp_y(ty1 + 1.0));

        let lut = |ty: usize, tx: usize| luts[ty * tiles_x + tx][v] as f32;
        let top = lut(y1, x1) * (1.0 - xa) + lut(y1, x2) * xa;
        let bottom = lut(y2, x1) * (1.0 - xa) + lut(y2, x2) * xa;
        let value = top * (1.0 - ya) + bottom * ya;

        out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }

    out
}

fn clipped_equalization(hist: &[u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }

    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut clipped = *hist;
    let mut excess = 0u32;
    for bin in clipped.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let per_bin = excess / 256;
    let mut residual = excess % 256;
    for bin in clipped.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in clipped.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut sum = 0u32;
    for (out, &count) in lut.iter_mut().zip(clipped.iter()) {
        sum += count;
        *out = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

const WHITE_X: f32 = 0.950456;
const WHITE_Z: f32 = 1.088754;
const LAB_EPSILON: f32 = 0.008856;

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// 8-bit sRGB to L* (0-100), a*, b*
pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(c as f32 / 255.0));

    let x = (0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b) / WHITE_X;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
    let z = (0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// L*a*b* back to 8-bit sRGB, clipping out-of-gamut values
pub fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let fy = (lab[0] + 16.0) / 116.0;
    let fx = fy + lab[1] / 500.0;
    let fz = fy - lab[2] / 200.0;

    let x = lab_f_inv(fx) * WHITE_X;
    let y = lab_f_inv(fy);
    let z = lab_f_inv(fz) * WHITE_Z;

    let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
    let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

    [r, g, b].map(|c| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round().clamp(0.0, 255.0) as u8)
}
