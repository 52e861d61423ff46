//! Frame acquisition
//!
//! Real camera capture is owned by the platform integration; the engine only needs
//! something that hands it frames in arrival order.

use std::sync::Arc;
use std::time::Instant;

use crate::Result;

/// One captured frame, stored as packed RGB8
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter, starting at 0
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes of RGB
    pub rgb: Arc<[u8]>,
    pub captured_at: Instant,
}

impl Frame {
    /// Build a frame filled with a single gray level
    #[must_use]
    pub fn uniform(index: u64, width: u32, height: u32, level: u8, captured_at: Instant) -> Self {
        let len = width as usize * height as usize * 3;
        Self {
            index,
            width,
            height,
            rgb: vec![level; len].into(),
            captured_at,
        }
    }

    /// True when the frame carries no pixels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.rgb.is_empty()
    }

    /// Luma (BT.601) plane, one byte per pixel
    #[must_use]
    pub fn to_luma(&self) -> Vec<u8> {
        self.rgb
            .chunks_exact(3)
            .map(|px| {
                let y = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
                #[allow(clippy::cast_possible_truncation)]
                let luma = (y / 1000) as u8;
                luma
            })
            .collect()
    }

    /// Encode the luma plane as a binary PGM image
    #[must_use]
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend(self.to_luma());
        out
    }
}

/// Anything that yields frames in arrival order
pub trait FrameSource: Send {
    /// Next frame, or `None` if no frame was available this tick
    ///
    /// # Errors
    ///
    /// Returns error if the device failed irrecoverably
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Frame source that fabricates flat gray frames
///
/// Used by the self-check and on machines without a camera integration.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    next_index: u64,
}

impl SyntheticCamera {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            next_index: 0,
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = Frame::uniform(self.next_index, self.width, self.height, 128, Instant::now());
        self.next_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frames_are_ordered() {
        let mut cam = SyntheticCamera::new(4, 2);
        let a = cam.next_frame().unwrap().unwrap();
        let b = cam.next_frame().unwrap().unwrap();
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(a.rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_pgm_header() {
        let frame = Frame::uniform(0, 3, 2, 200, Instant::now());
        let pgm = frame.to_pgm();
        assert!(pgm.starts_with(b"P5\n3 2\n255\n"));
        assert_eq!(pgm.len(), b"P5\n3 2\n255\n".len() + 6);
        assert_eq!(pgm.last(), Some(&200));
    }
}
