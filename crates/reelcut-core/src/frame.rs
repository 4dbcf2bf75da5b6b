//! Frame buffer types for video frames in CPU memory.
//!
//! The export path only moves 8-bit RGBA between the decoder, the
//! compositor and the encoder input, so frames are tightly packed RGBA
//! (`stride == width * 4`).

use std::sync::Arc;

use crate::error::{ReelError, Result};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A tightly packed RGBA8 video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel data, row-major, `width * height * 4` bytes
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Create a zeroed (transparent black) frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; Self::byte_len(width, height)],
        }
    }

    /// Wrap existing RGBA bytes, checking the length.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(ReelError::InvalidParameter(format!(
                "RGBA frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create a frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut frame = Self::new(width, height);
        for px in frame.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
        frame
    }

    /// Bytes needed for a frame of the given size.
    #[inline]
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Bytes per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Get a row of pixel data.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride();
        &self.data[start..start + self.stride()]
    }

    /// Read one pixel.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Write one pixel.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.data[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }

    /// Create a test pattern frame (8 vertical colour bars).
    pub fn test_pattern(width: u32, height: u32) -> Self {
        const BARS: [[u8; 4]; 8] = [
            [255, 255, 255, 255], // White
            [255, 255, 0, 255],   // Yellow
            [0, 255, 255, 255],   // Cyan
            [0, 255, 0, 255],     // Green
            [255, 0, 255, 255],   // Magenta
            [255, 0, 0, 255],     // Red
            [0, 0, 255, 255],     // Blue
            [0, 0, 0, 255],       // Black
        ];
        let mut frame = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let bar = (x as u64 * 8 / width.max(1) as u64) as usize;
                frame.set_pixel(x, y, BARS[bar.min(7)]);
            }
        }
        frame
    }
}

/// Arc-wrapped frame buffer for shared ownership.
pub type SharedFrameBuffer = Arc<FrameBuffer>;

/// The input side of a video encoder.
///
/// A hardware encoder exposes its input as a drawable surface: whatever is
/// presented to it becomes the next source frame. The render bridge binds its
/// window surface to one of these and hands over every swapped frame together
/// with the presentation time stamped on it.
pub trait FrameSink: Send {
    /// Width the encoder expects.
    fn width(&self) -> u32;

    /// Height the encoder expects.
    fn height(&self) -> u32;

    /// Submit a finished frame stamped with `presentation_time_ns`.
    fn submit(&mut self, frame: &FrameBuffer, presentation_time_ns: i64) -> Result<()>;

    /// Release the underlying platform surface.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_frame_size() {
        let frame = FrameBuffer::new(1920, 1080);
        assert_eq!(frame.data.len(), 1920 * 1080 * 4);
        assert_eq!(frame.stride(), 1920 * 4);
    }

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(FrameBuffer::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(FrameBuffer::from_rgba(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn test_pixel_roundtrip() {
        let mut frame = FrameBuffer::new(4, 4);
        frame.set_pixel(3, 2, [1, 2, 3, 4]);
        assert_eq!(frame.pixel(3, 2), [1, 2, 3, 4]);
        assert_eq!(frame.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_test_pattern() {
        let frame = FrameBuffer::test_pattern(16, 2);
        assert_eq!(frame.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(15, 1), [0, 0, 0, 255]);
    }
}
