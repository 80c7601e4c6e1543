//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::control::{Control, Value};
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

/// `V4L2_CID_FOCUS_AUTO` (camera class base 0x009a0900 + 12).
const V4L2_CID_FOCUS_AUTO: u32 = 0x009a_090c;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera released")]
    Released,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// Packed RGB24 (3 bytes/pixel).
    Rgb3,
}

/// What to ask the driver for when opening a device.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device index, opened as `/dev/video{index}` unless `device_path` is set.
    pub index: u32,
    pub device_path: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub autofocus: bool,
    /// Number of mmap buffers. Fewer buffers means fresher frames.
    pub buffer_count: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            device_path: None,
            width: 640,
            height: 480,
            target_fps: 30,
            autofocus: true,
            buffer_count: 2,
        }
    }
}

impl CameraSettings {
    pub fn device_path(&self) -> String {
        self.device_path
            .clone()
            .unwrap_or_else(|| format!("/dev/video{}", self.index))
    }
}

/// V4L2 camera device handle with a persistent capture stream.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    current_frame: Option<Frame>,
}

impl Camera {
    /// Open a V4L2 camera and start streaming with the requested settings.
    pub fn open(settings: &CameraSettings) -> Result<Self, CameraError> {
        let device_path = settings.device_path();
        if !Path::new(&device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path));
        }

        let device = Device::with_path(&device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = %device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let cap_flags = caps.capabilities;
        if !cap_flags.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV at the configured size; accept GREY or RGB3 if the
        // driver insists on something else.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = settings.width;
        fmt.height = settings.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = pixel_format_for(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or RGB3)"
            ))
        })?;

        if negotiated.width != settings.width || negotiated.height != settings.height {
            tracing::warn!(
                requested_width = settings.width,
                requested_height = settings.height,
                width = negotiated.width,
                height = negotiated.height,
                "driver adjusted the frame size"
            );
        }

        match device.set_params(&Parameters::with_fps(settings.target_fps)) {
            Ok(params) => tracing::debug!(interval = ?params.interval, "frame interval set"),
            Err(e) => tracing::warn!(error = %e, fps = settings.target_fps, "could not set frame rate"),
        }

        if settings.autofocus {
            let ctrl = Control {
                id: V4L2_CID_FOCUS_AUTO,
                value: Value::Boolean(true),
            };
            if let Err(e) = device.set_control(ctrl) {
                tracing::debug!(error = %e, "autofocus control not available");
            }
        }

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, settings.buffer_count.max(1))
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            fps = settings.target_fps,
            buffers = settings.buffer_count,
            "Camera initialized successfully"
        );

        Ok(Self {
            stream: Some(stream),
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path,
            fourcc,
            pixel_format,
            current_frame: None,
        })
    }

    /// Read the next frame from the stream, converted to RGB.
    pub fn get_frame(&mut self) -> Result<Frame, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::Released)?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let rgb = buf_to_rgb(self.pixel_format, buf, self.width, self.height)?;
        let frame = Frame {
            data: rgb,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence,
        };
        self.current_frame = Some(frame.clone());
        Ok(frame)
    }

    /// The most recent successfully captured frame.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.current_frame.as_ref()
    }

    /// Stop streaming. Later reads fail with [`CameraError::Released`].
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                tracing::warn!(error = %e, device = %self.device_path, "failed to stop stream");
            }
            tracing::info!(device = %self.device_path, "Camera released");
        }
    }

    /// Driver-reported card name, for diagnostics.
    pub fn card_name(&self) -> Option<String> {
        self.device.query_caps().ok().map(|c| c.card)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.get_frame()
    }

    fn release(&mut self) {
        Camera::release(self);
    }
}

fn pixel_format_for(fourcc: FourCC) -> Option<PixelFormat> {
    if fourcc == FourCC::new(b"YUYV") {
        Some(PixelFormat::Yuyv)
    } else if fourcc == FourCC::new(b"GREY") {
        Some(PixelFormat::Grey)
    } else if fourcc == FourCC::new(b"RGB3") {
        Some(PixelFormat::Rgb3)
    } else {
        None
    }
}

/// Convert a raw driver buffer to RGB8 based on the negotiated format.
fn buf_to_rgb(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("GREY conversion failed: {e}"))),
        PixelFormat::Rgb3 => {
            let expected = (width * height * 3) as usize;
            if buf.len() < expected {
                return Err(CameraError::CaptureFailed(format!(
                    "RGB3 buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..expected].to_vec())
        }
    }
}
