//! drowsy-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access, RGB frame conversions, and the
//! [`FrameSource`] trait the detection loop reads from.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, CameraSettings, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::{FrameSource, StillImage};
