//! Frame sources: anything the detection loop can pull frames from.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::path::Path;

/// A producer of frames for the detection loop.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Release the underlying device. Reads after release fail.
    fn release(&mut self) {}
}

/// Replays a single still image, optionally a limited number of times.
pub struct StillImage {
    frame: Frame,
    remaining: Option<usize>,
    sequence: u32,
    released: bool,
}

impl StillImage {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            remaining: None,
            sequence: 0,
            released: false,
        }
    }

    /// Decode an image file (any format the `image` crate reads).
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        if !path.exists() {
            return Err(CameraError::DeviceNotFound(path.display().to_string()));
        }
        let img = image::open(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?;
        Ok(Self::new(Frame::from_rgb_image(img.to_rgb8())))
    }

    /// Stop producing frames after `count` reads.
    pub fn with_limit(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

}

impl FrameSource for StillImage {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.released {
            return Err(CameraError::Released);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(CameraError::CaptureFailed("end of stream".into()));
            }
            *remaining -= 1;
        }

        self.sequence = self.sequence.wrapping_add(1);
        let mut frame = self.frame.clone();
        frame.sequence = self.sequence;
        frame.timestamp = std::time::Instant::now();
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }
}
