//! Camera frame types.
//!
//! A [`Frame`] is the raw 8-bit sensor readout copied out of the driver's
//! buffer during hand-off. Frames are immutable once captured and are shared
//! as `Arc<Frame>` between the capture buffer and the live-preview slot.
//!
//! A [`FrameBatch`] is the ordered set of exactly N frames captured over one
//! acquisition window, together with the per-frame total intensities.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Horizontal crop applied to frames at hand-off time.
///
/// Columns `[x_offset, x_offset + width)` are kept; the window is clamped to
/// the sensor width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    /// First column kept
    pub x_offset: u32,
    /// Number of columns kept
    pub width: u32,
}

impl CropWindow {
    /// Resolve the window against a sensor width, returning `(start, width)`.
    #[must_use]
    pub fn clamp_to(&self, sensor_width: u32) -> (u32, u32) {
        let start = self.x_offset.min(sensor_width);
        let width = self.width.min(sensor_width - start);
        (start, width)
    }
}

/// A single 8-bit raw sensor frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Row-major pixel data (`width * height` bytes)
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Create a frame from row-major pixel data.
    ///
    /// Returns `None` if the buffer is shorter than `width * height`. Extra
    /// trailing bytes (driver line padding) are discarded.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, pixels: &[u8]) -> Option<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() < expected {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels: pixels[..expected].to_vec(),
        })
    }

    /// Copy a raw buffer keeping only the columns selected by `crop`.
    #[must_use]
    pub fn from_raw_cropped(
        width: u32,
        height: u32,
        pixels: &[u8],
        crop: Option<CropWindow>,
    ) -> Option<Self> {
        let Some(crop) = crop.filter(|_| width > 0) else {
            return Self::from_raw(width, height, pixels);
        };
        if pixels.len() < width as usize * height as usize {
            return None;
        }

        let (start, crop_width) = crop.clamp_to(width);
        let (start, crop_width) = (start as usize, crop_width as usize);
        let mut cropped = Vec::with_capacity(crop_width * height as usize);
        for row in pixels.chunks_exact(width as usize).take(height as usize) {
            cropped.extend_from_slice(&row[start..start + crop_width]);
        }

        Some(Self {
            width: crop_width as u32,
            height,
            pixels: cropped,
        })
    }

    /// Sum of all pixel values.
    #[inline]
    #[must_use]
    pub fn total_intensity(&self) -> u64 {
        self.pixels.iter().map(|&p| u64::from(p)).sum()
    }

    /// Pixel value at `(x, y)`, if inside the frame.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Exactly N frames in arrival order plus their total intensities.
///
/// The invariant `frames.len() == intensities.len() == N` is checked at
/// construction; a batch that does not satisfy it cannot exist.
#[derive(Debug, Clone, Serialize)]
pub struct FrameBatch {
    #[serde(skip)]
    frames: Vec<Arc<Frame>>,
    intensities: Vec<u64>,
}

impl FrameBatch {
    /// Build a batch from captured frames, computing the per-frame totals.
    pub fn from_frames(frames: Vec<Arc<Frame>>, expected: usize) -> AppResult<Self> {
        let intensities: Vec<u64> = frames.iter().map(|f| f.total_intensity()).collect();
        Self::new(frames, intensities, expected)
    }

    /// Build a batch from frames and precomputed intensities.
    pub fn new(frames: Vec<Arc<Frame>>, intensities: Vec<u64>, expected: usize) -> AppResult<Self> {
        if frames.len() != expected || intensities.len() != expected {
            return Err(DaqError::InvalidBatch {
                expected,
                frames: frames.len(),
                intensities: intensities.len(),
            });
        }
        Ok(Self {
            frames,
            intensities,
        })
    }

    /// Frames in arrival order.
    #[must_use]
    pub fn frames(&self) -> &[Arc<Frame>] {
        &self.frames
    }

    /// Total intensity of each frame, parallel to [`FrameBatch::frames`].
    #[must_use]
    pub fn intensities(&self) -> &[u64] {
        &self.intensities
    }

    /// Number of frames (N).
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True for a zero-capacity batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_intensity_sums_all_pixels() {
        let frame = Frame::from_raw(2, 2, &[255, 255, 1, 0]).unwrap();
        assert_eq!(frame.total_intensity(), 511);
    }

    #[test]
    fn test_from_raw_rejects_short_buffer() {
        assert!(Frame::from_raw(4, 4, &[0u8; 15]).is_none());
    }

    #[test]
    fn test_from_raw_drops_padding() {
        let frame = Frame::from_raw(2, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(frame.pixels, vec![1, 2]);
    }

    #[test]
    fn test_crop_keeps_column_window() {
        // 4x2 frame, columns 1..3 kept
        let raw = [0, 1, 2, 3, 10, 11, 12, 13];
        let crop = CropWindow {
            x_offset: 1,
            width: 2,
        };
        let frame = Frame::from_raw_cropped(4, 2, &raw, Some(crop)).unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.pixels, vec![1, 2, 11, 12]);
        assert_eq!(frame.pixel(1, 1), Some(12));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_crop_is_clamped_to_sensor() {
        let crop = CropWindow {
            x_offset: 3,
            width: 10,
        };
        assert_eq!(crop.clamp_to(4), (3, 1));
        assert_eq!(crop.clamp_to(2), (2, 0));
    }

    #[test]
    fn test_batch_requires_exact_length() {
        let frame = Arc::new(Frame::from_raw(1, 1, &[7]).unwrap());
        let err = FrameBatch::from_frames(vec![frame.clone()], 2).unwrap_err();
        assert!(matches!(
            err,
            DaqError::InvalidBatch {
                expected: 2,
                frames: 1,
                intensities: 1
            }
        ));

        let batch = FrameBatch::from_frames(vec![frame.clone(), frame], 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.intensities(), &[7, 7]);
    }

    #[test]
    fn test_batch_rejects_mismatched_intensities() {
        let frame = Arc::new(Frame::from_raw(1, 1, &[7]).unwrap());
        assert!(FrameBatch::new(vec![frame], vec![7, 7], 1).is_err());
    }
}
