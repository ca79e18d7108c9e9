//! Frame data structures shared by every source

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Pixel channel order of a raw buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// Red, green, blue (canonical order of [`Frame`])
    #[default]
    Rgb,
    /// Blue, green, red
    Bgr,
    /// Red, green, blue, alpha
    Rgba,
    /// Blue, green, red, alpha
    Bgra,
}

impl ChannelOrder {
    /// Bytes per pixel for this order
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ChannelOrder::Rgb | ChannelOrder::Bgr => 3,
            ChannelOrder::Rgba | ChannelOrder::Bgra => 4,
        }
    }

    /// Whether red and blue are stored swapped relative to RGB
    pub fn is_blue_first(&self) -> bool {
        matches!(self, ChannelOrder::Bgr | ChannelOrder::Bgra)
    }
}

/// A decoded frame in canonical RGB8 order
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
    /// 1-based position in the stream this frame came from, if any
    pub index: Option<u64>,
}

impl Frame {
    /// Wrap an RGB image as a standalone frame
    pub fn new(image: RgbImage) -> Self {
        Self { image, index: None }
    }

    /// Wrap an RGB image that sits at `index` in a stream
    pub fn with_index(image: RgbImage, index: u64) -> Self {
        Self {
            image,
            index: Some(index),
        }
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Whether the frame has no pixels
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    /// Borrow the pixel buffer
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Take ownership of the pixel buffer
    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::new(RgbImage::new(64, 32));
        assert_eq!(frame.dimensions(), (64, 32));
        assert!(!frame.is_empty());
        assert_eq!(frame.index, None);

        let empty = Frame::new(RgbImage::new(0, 10));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_with_index_keeps_pixels() {
        let frame = Frame::with_index(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])), 7);
        assert_eq!(frame.index, Some(7));
        assert_eq!(frame.into_image().get_pixel(1, 1).0, [1, 2, 3]);
    }

    #[test]
    fn test_channel_order_layout() {
        assert_eq!(ChannelOrder::Rgb.bytes_per_pixel(), 3);
        assert_eq!(ChannelOrder::Bgra.bytes_per_pixel(), 4);
        assert!(ChannelOrder::Bgr.is_blue_first());
        assert!(!ChannelOrder::Rgba.is_blue_first());
    }
}
