//! Main detection loop and the hooks for eye analysis and alerting.

use crate::pipeline::{DetectionCamera, PipelineError};
use drowsy_core::draw::{self, GREEN, RED, WHITE};
use drowsy_core::Landmarks;
use drowsy_hw::Frame;
use serde::Serialize;
use std::time::{Duration, Instant};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Decides from the eye landmarks whether the driver is drowsy.
pub trait EyeAnalyzer {
    fn analyze_eyes(&mut self, landmarks: &Landmarks) -> Result<bool, HookError>;
}

/// Alerts the driver.
pub trait AlertSink {
    fn trigger_alert(&mut self) -> Result<(), HookError>;

    fn shutdown(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    pub max_frames: Option<u64>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserQuit,
    CaptureFailed,
    DetectionFailed,
    DisplayFailed,
    FrameLimit,
    TimeLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub frames_with_face: u64,
    pub elapsed_secs: f64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub fn fps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.frames_processed as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub frames_processed: u64,
    pub face_detected: bool,
    pub eye_detector_integrated: bool,
    pub alarm_system_integrated: bool,
    pub frames_with_face: u64,
    /// Fraction of processed frames with a face, 0.0 before any frame.
    pub detection_rate: f64,
}

pub struct DrowsinessSystem {
    camera: DetectionCamera,
    eye_analyzer: Option<Box<dyn EyeAnalyzer>>,
    alert_sink: Option<Box<dyn AlertSink>>,
    frame_skip: usize,
    running: bool,
    stopped: bool,
    frames_processed: u64,
    frames_with_face: u64,
}

impl DrowsinessSystem {
    /// `frame_skip` of N runs detection on every Nth captured frame.
    pub fn new(camera: DetectionCamera, frame_skip: usize) -> Self {
        tracing::info!("Driver Drowsiness Detection System initialized");
        Self {
            camera,
            eye_analyzer: None,
            alert_sink: None,
            frame_skip: frame_skip.max(1),
            running: false,
            stopped: false,
            frames_processed: 0,
            frames_with_face: 0,
        }
    }

    pub fn integrate_eye_detection_module(&mut self, analyzer: Box<dyn EyeAnalyzer>) {
        self.eye_analyzer = Some(analyzer);
        tracing::info!("Eye detection module integrated");
    }

    pub fn integrate_alarm_module(&mut self, sink: Box<dyn AlertSink>) {
        self.alert_sink = Some(sink);
        tracing::info!("Alarm module integrated");
    }

    /// Hand the current landmarks to the analyzer and raise an alert on a
    /// drowsy verdict. Returns the verdict, if one was made.
    pub fn process_frame(&mut self) -> Option<bool> {
        let landmarks = self.camera.get_face_landmarks()?;
        let analyzer = self.eye_analyzer.as_mut()?;

        let drowsy = match analyzer.analyze_eyes(landmarks) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "eye analysis failed");
                return None;
            }
        };

        if drowsy {
            if let Some(sink) = self.alert_sink.as_mut() {
                tracing::debug!("drowsiness verdict, triggering alert");
                if let Err(e) = sink.trigger_alert() {
                    tracing::warn!(error = %e, "alert failed");
                }
            }
        }
        Some(drowsy)
    }

    /// Capture, detect and display until the user quits, capture fails or a
    /// limit is hit. Always ends by stopping the system.
    pub fn start_detection(&mut self, limits: RunLimits) -> RunSummary {
        tracing::info!(
            max_frames = ?limits.max_frames,
            duration = ?limits.duration,
            "Starting drowsiness detection, press q or Esc to quit"
        );
        self.running = true;
        let started = Instant::now();
        let mut tick: u64 = 0;

        let stop_reason = loop {
            tick += 1;
            if (tick - 1) % self.frame_skip as u64 != 0 {
                if let Err(e) = self.camera.skip_frame() {
                    tracing::error!(error = %e, "failed to capture frame");
                    break StopReason::CaptureFailed;
                }
                continue;
            }

            let capture = match self.camera.capture_and_detect() {
                Ok(c) => c,
                Err(PipelineError::Camera(e)) => {
                    tracing::error!(error = %e, "failed to capture frame");
                    break StopReason::CaptureFailed;
                }
                Err(PipelineError::Detector(e)) => {
                    tracing::error!(error = %e, "face detection failed");
                    break StopReason::DetectionFailed;
                }
            };

            self.frames_processed += 1;
            if capture.face_detected {
                self.frames_with_face += 1;
            }

            self.process_frame();

            let mut frame = capture.frame;
            overlay_status(&mut frame, capture.face_detected, self.frames_processed);
            if let Err(e) = self.camera.display_frame(&frame) {
                tracing::error!(error = %e, "failed to display frame");
                break StopReason::DisplayFailed;
            }

            if self.camera.quit_requested() {
                break StopReason::UserQuit;
            }
            if limits.max_frames.is_some_and(|max| self.frames_processed >= max) {
                break StopReason::FrameLimit;
            }
            if limits.duration.is_some_and(|d| started.elapsed() >= d) {
                break StopReason::TimeLimit;
            }
        };

        let summary = RunSummary {
            frames_processed: self.frames_processed,
            frames_with_face: self.frames_with_face,
            elapsed_secs: started.elapsed().as_secs_f64(),
            stop_reason,
        };
        tracing::info!(reason = ?stop_reason, fps = %format!("{:.1}", summary.fps()), "detection loop ended");
        self.stop_detection();
        summary
    }

    /// Release the camera and detector and shut the alert sink down.
    /// Safe to call more than once.
    pub fn stop_detection(&mut self) {
        self.running = false;
        if self.stopped {
            return;
        }
        self.stopped = true;

        tracing::info!(
            frames = self.frames_processed,
            with_face = self.frames_with_face,
            detection_rate = %format!("{:.1}%", self.detection_rate() * 100.0),
            "Stopping detection system"
        );
        self.camera.release();
        if let Some(sink) = self.alert_sink.as_mut() {
            if let Err(e) = sink.shutdown() {
                tracing::debug!(error = %e, "alarm shutdown failed");
            }
        }
        tracing::info!("System stopped");
    }

    pub fn get_camera_module(&self) -> &DetectionCamera {
        &self.camera
    }

    pub fn get_system_status(&self) -> SystemStatus {
        SystemStatus {
            running: self.running,
            frames_processed: self.frames_processed,
            face_detected: self.camera.is_face_detected(),
            eye_detector_integrated: self.eye_analyzer.is_some(),
            alarm_system_integrated: self.alert_sink.is_some(),
            frames_with_face: self.frames_with_face,
            detection_rate: self.detection_rate(),
        }
    }

    fn detection_rate(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.frames_with_face as f64 / self.frames_processed as f64
        }
    }
}

/// Face status line at (10, 30) and the frame counter at (10, 70).
fn overlay_status(frame: &mut Frame, face_detected: bool, frames: u64) {
    let (text, color) = if face_detected {
        ("FACE DETECTED", GREEN)
    } else {
        ("NO FACE", RED)
    };
    draw::put_text(frame, text, 10, 30, 3, color);
    draw::put_text(frame, &format!("Frame: {frames}"), 10, 70, 2, WHITE);
}
