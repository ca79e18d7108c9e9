//! Frame Source Layer
//!
//! Normalizes still images, decoded video frames and pushed live frames into
//! a single [`Frame`] representation in RGB8 order.

pub mod frame;
pub mod video;

use base64::Engine;
use image::{DynamicImage, RgbImage};
use std::path::Path;
use tracing::debug;

use crate::error::PlateError;

pub use frame::{ChannelOrder, Frame};
pub use video::{iterate_video, iterate_video_source, VideoFrames, VideoSource};

/// A live frame as received from a push-based source
#[derive(Debug, Clone, Copy)]
pub enum LiveFrameInput<'a> {
    /// Encoded image bytes (JPEG, PNG, ...)
    Encoded(&'a [u8]),
    /// Raw pixel buffer with explicit layout
    Raw {
        data: &'a [u8],
        width: u32,
        height: u32,
        order: ChannelOrder,
    },
    /// Base64 text, bare or as a `data:` URL
    Base64(&'a str),
}

/// Load an image file from disk
pub fn load_image(path: &Path) -> Result<Frame, PlateError> {
    let img = image::open(path)
        .map_err(|e| PlateError::decode(format!("image {:?}", path), e))?;
    debug!("Loaded image {:?} ({}x{})", path, img.width(), img.height());
    Ok(Frame::new(img.to_rgb8()))
}

/// Decode an in-memory encoded image
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Frame, PlateError> {
    if bytes.is_empty() {
        return Err(PlateError::decode("image bytes", "empty buffer"));
    }
    let img = image::load_from_memory(bytes).map_err(|e| PlateError::decode("image bytes", e))?;
    Ok(Frame::new(img.to_rgb8()))
}

/// Wrap a frame pushed by a live source
pub fn wrap_live_frame(input: LiveFrameInput<'_>) -> Result<Frame, PlateError> {
    match input {
        LiveFrameInput::Encoded(bytes) => decode_image_bytes(bytes),
        LiveFrameInput::Raw {
            data,
            width,
            height,
            order,
        } => raw_to_frame(data, width, height, order),
        LiveFrameInput::Base64(text) => {
            let bytes = decode_base64_payload(text)?;
            decode_image_bytes(&bytes)
        }
    }
}

/// Convert a raw pixel buffer into an RGB frame
fn raw_to_frame(data: &[u8], width: u32, height: u32, order: ChannelOrder) -> Result<Frame, PlateError> {
    let expected = width as usize * height as usize * order.bytes_per_pixel();
    if width == 0 || height == 0 {
        return Err(PlateError::decode("raw frame", "zero dimension"));
    }
    if data.len() != expected {
        return Err(PlateError::decode(
            "raw frame",
            format!(
                "expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                order,
                data.len()
            ),
        ));
    }

    let image = match order {
        ChannelOrder::Rgb => RgbImage::from_raw(width, height, data.to_vec()),
        ChannelOrder::Rgba => image::RgbaImage::from_raw(width, height, data.to_vec())
            .map(|img| DynamicImage::ImageRgba8(img).to_rgb8()),
        ChannelOrder::Bgr | ChannelOrder::Bgra => {
            let bpp = order.bytes_per_pixel();
            let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
            for chunk in data.chunks_exact(bpp) {
                rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
            }
            RgbImage::from_raw(width, height, rgb)
        }
    };

    image
        .map(Frame::new)
        .ok_or_else(|| PlateError::decode("raw frame", "buffer does not match dimensions"))
}

/// Decode base64 text, accepting a `data:<mime>;base64,` prefix
fn decode_base64_payload(text: &str) -> Result<Vec<u8>, PlateError> {
    let trimmed = text.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| PlateError::decode("base64 frame", "data URL without payload"))?,
        None => trimmed,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| PlateError::decode("base64 frame", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encoded_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 10]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_load_image_missing_file() {
        let result = load_image(Path::new("/nonexistent/plate.jpg"));
        assert!(matches!(result, Err(PlateError::Decode { .. })));
    }

    #[test]
    fn test_load_image_not_an_image() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        std::fs::write(file.path(), b"definitely not a png").unwrap();
        assert!(matches!(load_image(file.path()), Err(PlateError::Decode { .. })));
    }

    #[test]
    fn test_load_image_png() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        std::fs::write(file.path(), encoded_png(8, 4)).unwrap();

        let frame = load_image(file.path()).unwrap();
        assert_eq!(frame.dimensions(), (8, 4));
        assert_eq!(frame.image().get_pixel(0, 0).0, [200, 40, 10]);
    }

    #[test]
    fn test_wrap_live_frame_encoded() {
        let bytes = encoded_png(5, 5);
        let frame = wrap_live_frame(LiveFrameInput::Encoded(&bytes)).unwrap();
        assert_eq!(frame.dimensions(), (5, 5));
    }

    #[test]
    fn test_wrap_live_frame_malformed() {
        let result = wrap_live_frame(LiveFrameInput::Encoded(&[0xff, 0xd8, 0x00, 0x01]));
        assert!(matches!(result, Err(PlateError::Decode { .. })));

        let result = wrap_live_frame(LiveFrameInput::Encoded(&[]));
        assert!(matches!(result, Err(PlateError::Decode { .. })));
    }

    #[test]
    fn test_wrap_live_frame_raw_bgr() {
        // 2x1 BGR: blue pixel then red pixel
        let data = [255, 0, 0, 0, 0, 255];
        let frame = wrap_live_frame(LiveFrameInput::Raw {
            data: &data,
            width: 2,
            height: 1,
            order: ChannelOrder::Bgr,
        })
        .unwrap();

        assert_eq!(frame.image().get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(frame.image().get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_wrap_live_frame_raw_length_mismatch() {
        let data = [0u8; 10];
        let result = wrap_live_frame(LiveFrameInput::Raw {
            data: &data,
            width: 2,
            height: 2,
            order: ChannelOrder::Rgba,
        });
        assert!(matches!(result, Err(PlateError::Decode { .. })));
    }

    #[test]
    fn test_wrap_live_frame_base64_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(encoded_png(3, 2));
        let url = format!("data:image/png;base64,{}", encoded);

        let frame = wrap_live_frame(LiveFrameInput::Base64(&url)).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));

        let frame = wrap_live_frame(LiveFrameInput::Base64(&encoded)).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
    }

    #[test]
    fn test_wrap_live_frame_bad_base64() {
        let result = wrap_live_frame(LiveFrameInput::Base64("not base64 at all!"));
        assert!(matches!(result, Err(PlateError::Decode { .. })));
    }
}
