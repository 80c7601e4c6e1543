use crate::display::Display;
use drowsy_core::{DetectorError, FaceDetector, Landmarks, Rect};
use drowsy_hw::{CameraError, Frame, FrameSource};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// One captured and analysed frame.
pub struct Capture {
    /// Frame with face/eye boxes drawn.
    pub frame: Frame,
    pub face_detected: bool,
    pub landmarks: Option<Landmarks>,
    /// The driver's face, in frame coordinates.
    pub face: Option<Rect>,
}

/// Camera plus detector: captures frames and keeps the latest detection state
/// for the rest of the system to query.
pub struct DetectionCamera {
    source: Box<dyn FrameSource>,
    detector: FaceDetector,
    display: Box<dyn Display>,
    face_detected: bool,
    landmarks: Option<Landmarks>,
    last_face_region: Option<Rect>,
}

impl DetectionCamera {
    pub fn new(source: Box<dyn FrameSource>, detector: FaceDetector, display: Box<dyn Display>) -> Self {
        tracing::info!("Drowsiness Detection Camera module initialized");
        Self {
            source,
            detector,
            display,
            face_detected: false,
            landmarks: None,
            last_face_region: None,
        }
    }

    /// Read and discard `count` frames while exposure settles.
    pub fn warm_up(&mut self, count: usize) -> Result<(), CameraError> {
        if count > 0 {
            tracing::info!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            self.source.read_frame()?;
        }
        Ok(())
    }

    /// Read one frame without running detection.
    pub fn skip_frame(&mut self) -> Result<(), CameraError> {
        self.source.read_frame().map(|_| ())
    }

    /// Capture a frame and run face then eye detection on it.
    pub fn capture_and_detect(&mut self) -> Result<Capture, PipelineError> {
        let frame = self.source.read_frame()?;
        Ok(self.detect_frame(&frame)?)
    }

    /// Run detection on an already captured frame and update the state.
    ///
    /// `face_detected` stays true when a face is found even if fewer than
    /// two eyes are, so the driver is still reported present.
    pub fn detect_frame(&mut self, frame: &Frame) -> Result<Capture, DetectorError> {
        let face = self.detector.detect_face(frame)?;

        let Some(detection) = face.detection else {
            self.face_detected = false;
            self.landmarks = None;
            return Ok(Capture {
                frame: face.annotated,
                face_detected: false,
                landmarks: None,
                face: None,
            });
        };

        let roi = self.detector.extract_face_roi(frame, detection);
        self.last_face_region = roi.as_ref().map(|r| r.rect);

        let result = self.detector.get_face_landmarks(&face.annotated, roi.as_ref())?;
        tracing::trace!(
            face = ?detection,
            eyes = result.landmarks.as_ref().map_or(0, |l| l.eye_count),
            "frame analysed"
        );

        self.face_detected = true;
        self.landmarks = result.landmarks;

        Ok(Capture {
            frame: result.annotated,
            face_detected: true,
            landmarks: self.landmarks.clone(),
            face: Some(detection),
        })
    }

    /// Landmarks from the most recent frame, if eyes were found.
    pub fn get_face_landmarks(&self) -> Option<&Landmarks> {
        self.landmarks.as_ref()
    }

    pub fn is_face_detected(&self) -> bool {
        self.face_detected
    }

    /// Placement of the last face crop, kept across frames without a face.
    pub fn last_face_region(&self) -> Option<Rect> {
        self.last_face_region
    }

    pub fn display_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.display.show(frame)
    }

    pub fn quit_requested(&self) -> bool {
        self.display.quit_requested()
    }

    /// Release the camera, the detector and the preview window.
    pub fn release(&mut self) {
        self.source.release();
        self.detector.release();
        self.display.close();
        tracing::info!("All camera resources released");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::display::Headless;
    use drowsy_core::{Cascade, DetectParams, DetectorOptions};
    use drowsy_hw::StillImage;

    /// A one-stage 4x4 cascade that fires on a bright-left/dark-right edge.
    pub(crate) const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>4</height>
  <width>4</width>
  <stages>
    <_>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 0.1</internalNodes>
          <leafValues>-1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 2 4 1.</_>
        <_>2 0 2 4 -1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    pub(crate) const DARK: [u8; 3] = [20, 20, 20];
    pub(crate) const BRIGHT: [u8; 3] = [230, 230, 230];

    /// Same window, but every position passes.
    fn accept_all_cascade() -> Cascade {
        let xml = EDGE_CASCADE.replace("<stageThreshold>0.", "<stageThreshold>-2.");
        Cascade::from_xml(&xml).unwrap()
    }

    fn pattern_params() -> DetectParams {
        DetectParams {
            scale_factor: 2.0,
            min_neighbors: 0,
            min_size: (8, 8),
            max_size: Some((8, 8)),
        }
    }

    fn detector_with(eye_cascade: Cascade, roi_margin: f32) -> FaceDetector {
        FaceDetector::from_cascades(
            Cascade::from_xml(EDGE_CASCADE).unwrap(),
            eye_cascade,
            DetectorOptions {
                face_params: pattern_params(),
                eye_params: pattern_params(),
                roi_margin,
                ..DetectorOptions::default()
            },
        )
    }

    /// Face found, and the wide crop around it yields many eye hits.
    pub(crate) fn eyes_detector() -> FaceDetector {
        detector_with(accept_all_cascade(), 1.0)
    }

    /// Face found, but the tight crop holds a single eye window at most.
    pub(crate) fn no_eyes_detector() -> FaceDetector {
        detector_with(Cascade::from_xml(EDGE_CASCADE).unwrap(), 0.0)
    }

    /// Face parameters the cascade rejects, so every detection errors.
    pub(crate) fn invalid_params_detector() -> FaceDetector {
        let cascade = Cascade::from_xml(EDGE_CASCADE).unwrap();
        FaceDetector::from_cascades(
            cascade.clone(),
            cascade,
            DetectorOptions {
                face_params: DetectParams {
                    scale_factor: 1.0,
                    ..pattern_params()
                },
                ..DetectorOptions::default()
            },
        )
    }

    /// A dark frame with one edge pattern for the face cascade.
    pub(crate) fn face_frame() -> Frame {
        let mut frame = Frame::filled(32, 32, DARK);
        for y in 8..16 {
            for x in 10..14 {
                frame.put_pixel(x, y, BRIGHT);
            }
        }
        frame
    }

    pub(crate) fn blank_frame() -> Frame {
        Frame::filled(32, 32, DARK)
    }

    pub(crate) fn camera_with(detector: FaceDetector, frame: Frame, limit: usize) -> DetectionCamera {
        let source = StillImage::new(frame).with_limit(limit);
        DetectionCamera::new(Box::new(source), detector, Box::new(Headless))
    }

    #[test]
    fn test_blank_frame_reports_no_face() {
        let mut camera = camera_with(eyes_detector(), blank_frame(), 1);
        let capture = camera.capture_and_detect().unwrap();
        assert!(!capture.face_detected);
        assert!(capture.landmarks.is_none());
        assert!(capture.face.is_none());
        assert!(!camera.is_face_detected());
        assert!(camera.get_face_landmarks().is_none());
        assert!(camera.last_face_region().is_none());
    }

    #[test]
    fn test_face_and_eyes_give_landmarks() {
        let mut camera = camera_with(eyes_detector(), face_frame(), 1);
        let capture = camera.capture_and_detect().unwrap();
        assert!(capture.face_detected);
        assert_eq!(capture.face.map(|f| (f.width, f.height)), Some((8, 8)));
        assert!(camera.is_face_detected());

        let landmarks = camera.get_face_landmarks().unwrap();
        assert!(landmarks.eye_count >= 2);
        assert_eq!(Some(landmarks.face_region), camera.last_face_region());
    }

    #[test]
    fn test_face_without_eyes_is_still_detected() {
        let mut camera = camera_with(no_eyes_detector(), face_frame(), 1);
        let capture = camera.capture_and_detect().unwrap();
        assert!(capture.face_detected);
        assert!(capture.landmarks.is_none());
        assert!(camera.is_face_detected());
        assert!(camera.get_face_landmarks().is_none());
    }

    #[test]
    fn test_state_clears_when_face_lost() {
        let mut camera = camera_with(eyes_detector(), face_frame(), 1);
        camera.capture_and_detect().unwrap();
        assert!(camera.get_face_landmarks().is_some());

        camera.detect_frame(&blank_frame()).unwrap();
        assert!(!camera.is_face_detected());
        assert!(camera.get_face_landmarks().is_none());
        // The last crop is kept for reference.
        assert!(camera.last_face_region().is_some());
    }

    #[test]
    fn test_capture_failure_is_camera_error() {
        let mut camera = camera_with(eyes_detector(), face_frame(), 0);
        assert!(matches!(
            camera.capture_and_detect(),
            Err(PipelineError::Camera(_))
        ));
    }

    #[test]
    fn test_detection_failure_is_detector_error() {
        let mut camera = camera_with(invalid_params_detector(), face_frame(), 1);
        assert!(matches!(
            camera.capture_and_detect(),
            Err(PipelineError::Detector(_))
        ));
    }

    #[test]
    fn test_warm_up_consumes_frames() {
        let mut camera = camera_with(eyes_detector(), face_frame(), 3);
        camera.warm_up(3).unwrap();
        assert!(camera.capture_and_detect().is_err());
    }

    #[test]
    fn test_release_stops_source() {
        let mut camera = camera_with(eyes_detector(), face_frame(), 5);
        camera.release();
        assert!(matches!(
            camera.capture_and_detect(),
            Err(PipelineError::Camera(CameraError::Released))
        ));
    }
}
