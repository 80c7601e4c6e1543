//! Face and eye detection on camera frames.
//!
//! Runs the face cascade on the whole frame and keeps only the largest
//! face (the driver), crops a margin around it, and runs the eye cascade
//! inside that crop. Detections are drawn onto a copy of the frame.

use crate::cascade::{Cascade, CascadeError, DetectParams};
use crate::draw::{self, BLUE, GREEN};
use crate::types::{Landmarks, Rect};
use drowsy_hw::Frame;
use std::path::Path;
use thiserror::Error;

pub const FACE_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
pub const EYE_CASCADE_FILE: &str = "haarcascade_eye.xml";
/// Where distribution packages of OpenCV install their Haar cascades.
pub const DEFAULT_CASCADE_DIR: &str = "/usr/share/opencv4/haarcascades";

/// Landmarks need at least this many eye boxes.
const MIN_EYES: usize = 2;
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to load {which} cascade: {source}")]
    CascadeLoad {
        which: &'static str,
        #[source]
        source: CascadeError,
    },
    #[error("detection failed: {0}")]
    Cascade(#[from] CascadeError),
}

/// Detector tuning, mirrored from the configuration file.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub face_params: DetectParams,
    pub eye_params: DetectParams,
    /// Margin added around the face on each side, as a fraction of its width.
    pub roi_margin: f32,
    pub draw_bounding_boxes: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            face_params: DetectParams::face(),
            eye_params: DetectParams::eye(),
            roi_margin: 0.1,
            draw_bounding_boxes: true,
        }
    }
}

/// The face crop handed to eye detection.
#[derive(Clone)]
pub struct FaceRoi {
    pub frame: Frame,
    /// Placement of the crop in the source frame.
    pub rect: Rect,
}

pub struct FaceResult {
    pub annotated: Frame,
    /// The largest face, if any.
    pub detection: Option<Rect>,
    pub face_detected: bool,
}

pub struct LandmarkResult {
    pub annotated: Frame,
    pub landmarks: Option<Landmarks>,
    pub landmarks_detected: bool,
}

/// Cascade-based face and eye detector.
pub struct FaceDetector {
    face_cascade: Cascade,
    eye_cascade: Cascade,
    options: DetectorOptions,
}

impl FaceDetector {
    /// Load the face and eye cascades from `cascade_dir`.
    pub fn load(cascade_dir: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        let face_cascade = Cascade::load(&cascade_dir.join(FACE_CASCADE_FILE))
            .map_err(|source| DetectorError::CascadeLoad { which: "face", source })?;
        let eye_cascade = Cascade::load(&cascade_dir.join(EYE_CASCADE_FILE))
            .map_err(|source| DetectorError::CascadeLoad { which: "eye", source })?;

        tracing::info!(
            dir = %cascade_dir.display(),
            "Face Detection module initialized successfully using Haar Cascade"
        );
        Ok(Self::from_cascades(face_cascade, eye_cascade, options))
    }

    pub fn from_cascades(face_cascade: Cascade, eye_cascade: Cascade, options: DetectorOptions) -> Self {
        Self {
            face_cascade,
            eye_cascade,
            options,
        }
    }

    /// Find the driver's face: the largest face in the frame.
    pub fn detect_face(&self, frame: &Frame) -> Result<FaceResult, DetectorError> {
        let gray = frame.to_gray();
        let faces = self.face_cascade.detect_multi_scale(
            &gray,
            frame.width,
            frame.height,
            &self.options.face_params,
        )?;

        let mut annotated = frame.clone();
        let detection = largest(&faces);

        if let Some(face) = detection {
            tracing::debug!(candidates = faces.len(), ?face, "face detected");
            if self.options.draw_bounding_boxes {
                draw::draw_rect(&mut annotated, face, GREEN, BOX_THICKNESS);
                draw::put_text(&mut annotated, "Face", face.x, face.y - 10, 1, GREEN);
            }
        }

        Ok(FaceResult {
            annotated,
            detection,
            face_detected: detection.is_some(),
        })
    }

    /// Look for eyes inside the face crop and build the landmark record.
    ///
    /// Landmarks count as found only with two or more eye boxes. Eye boxes
    /// are drawn onto a copy of `annotated` at the crop's offset.
    pub fn get_face_landmarks(
        &self,
        annotated: &Frame,
        face_roi: Option<&FaceRoi>,
    ) -> Result<LandmarkResult, DetectorError> {
        let mut out = annotated.clone();

        let Some(roi) = face_roi else {
            return Ok(LandmarkResult {
                annotated: out,
                landmarks: None,
                landmarks_detected: false,
            });
        };

        let gray = roi.frame.to_gray();
        let eyes = self.eye_cascade.detect_multi_scale(
            &gray,
            roi.frame.width,
            roi.frame.height,
            &self.options.eye_params,
        )?;
        tracing::trace!(eyes = eyes.len(), "eye candidates");

        if eyes.len() < MIN_EYES {
            return Ok(LandmarkResult {
                annotated: out,
                landmarks: None,
                landmarks_detected: false,
            });
        }

        let landmarks = Landmarks::new(eyes, roi.rect);
        if self.options.draw_bounding_boxes {
            for eye in landmarks.eyes_in_frame() {
                draw::draw_rect(&mut out, eye, BLUE, BOX_THICKNESS);
            }
        }

        Ok(LandmarkResult {
            annotated: out,
            landmarks: Some(landmarks),
            landmarks_detected: true,
        })
    }

    /// Crop the face plus a margin of `roi_margin * width` on every side,
    /// clipped to the frame. `None` if nothing of the face is in frame.
    pub fn extract_face_roi(&self, frame: &Frame, detection: Rect) -> Option<FaceRoi> {
        let rect = roi_rect(detection, self.options.roi_margin, frame.width, frame.height)?;
        let crop = frame.crop(rect.x as u32, rect.y as u32, rect.width as u32, rect.height as u32)?;
        Some(FaceRoi { frame: crop, rect })
    }

    pub fn release(&self) {
        tracing::info!("Face Detection resources released");
    }
}

/// Largest rectangle by area; the first one wins ties.
pub fn largest(rects: &[Rect]) -> Option<Rect> {
    rects
        .iter()
        .copied()
        .reduce(|best, r| if r.area() > best.area() { r } else { best })
}

/// Margin-expanded, frame-clipped face rectangle.
pub fn roi_rect(detection: Rect, margin: f32, frame_width: u32, frame_height: u32) -> Option<Rect> {
    let m = (margin * detection.width as f32) as i32;
    let expanded = Rect::new(
        detection.x - m,
        detection.y - m,
        detection.width + 2 * m,
        detection.height + 2 * m,
    );
    let clamped = expanded.clamp_to(frame_width, frame_height);
    (!clamped.is_empty()).then_some(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::tests::EDGE_CASCADE;

    const DARK: [u8; 3] = [20, 20, 20];
    const BRIGHT: [u8; 3] = [230, 230, 230];

    /// Finds the synthetic edge pattern at a single 8x8 scale.
    fn pattern_params() -> DetectParams {
        DetectParams {
            scale_factor: 2.0,
            min_neighbors: 0,
            min_size: (8, 8),
            max_size: Some((8, 8)),
        }
    }

    fn test_detector() -> FaceDetector {
        let cascade = Cascade::from_xml(EDGE_CASCADE).unwrap();
        FaceDetector::from_cascades(
            cascade.clone(),
            cascade,
            DetectorOptions {
                face_params: pattern_params(),
                eye_params: pattern_params(),
                ..DetectorOptions::default()
            },
        )
    }

    /// Paint a bright 4x8 block: the left half of an edge pattern.
    fn paint_pattern(frame: &mut Frame, ox: i64, oy: i64) {
        for y in oy..oy + 8 {
            for x in ox..ox + 4 {
                frame.put_pixel(x, y, BRIGHT);
            }
        }
    }

    fn count_color(frame: &Frame, color: [u8; 3]) -> usize {
        frame.data.chunks_exact(3).filter(|p| *p == color).count()
    }

    #[test]
    fn test_largest_picks_biggest_area() {
        let rects = [
            Rect::new(0, 0, 10, 10),
            Rect::new(50, 50, 40, 30),
            Rect::new(5, 5, 20, 20),
        ];
        assert_eq!(largest(&rects), Some(Rect::new(50, 50, 40, 30)));
    }

    #[test]
    fn test_largest_tie_keeps_first() {
        let rects = [Rect::new(0, 0, 10, 10), Rect::new(30, 30, 10, 10)];
        assert_eq!(largest(&rects), Some(Rect::new(0, 0, 10, 10)));
        assert_eq!(largest(&[]), None);
    }

    #[test]
    fn test_roi_rect_adds_margin() {
        // 10% of width 50 = 5 px on each side
        assert_eq!(
            roi_rect(Rect::new(10, 10, 50, 50), 0.1, 100, 100),
            Some(Rect::new(5, 5, 60, 60))
        );
    }

    #[test]
    fn test_roi_rect_margin_truncates() {
        // 0.1 * 39 = 3.9 → 3
        assert_eq!(
            roi_rect(Rect::new(20, 20, 39, 39), 0.1, 200, 200),
            Some(Rect::new(17, 17, 45, 45))
        );
    }

    #[test]
    fn test_roi_rect_clamped_at_edges() {
        assert_eq!(
            roi_rect(Rect::new(0, 0, 50, 50), 0.1, 100, 100),
            Some(Rect::new(0, 0, 55, 55))
        );
        assert_eq!(
            roi_rect(Rect::new(80, 80, 30, 30), 0.1, 100, 100),
            Some(Rect::new(77, 77, 23, 23))
        );
    }

    #[test]
    fn test_roi_rect_outside_frame() {
        assert_eq!(roi_rect(Rect::new(200, 200, 10, 10), 0.1, 100, 100), None);
    }

    #[test]
    fn test_extract_face_roi_crops_pixels() {
        let detector = test_detector();
        let mut frame = Frame::filled(100, 100, DARK);
        frame.put_pixel(5, 5, BRIGHT);
        let roi = detector.extract_face_roi(&frame, Rect::new(10, 10, 50, 50)).unwrap();
        assert_eq!(roi.rect, Rect::new(5, 5, 60, 60));
        assert_eq!((roi.frame.width, roi.frame.height), (60, 60));
        assert_eq!(roi.frame.pixel(0, 0), Some(BRIGHT));
    }

    #[test]
    fn test_detect_face_blank_frame() {
        let detector = test_detector();
        let frame = Frame::filled(64, 48, DARK);
        let result = detector.detect_face(&frame).unwrap();
        assert!(!result.face_detected);
        assert!(result.detection.is_none());
        assert_eq!(result.annotated.data, frame.data);
    }

    #[test]
    fn test_detect_face_finds_pattern_and_draws() {
        let detector = test_detector();
        let mut frame = Frame::filled(32, 32, DARK);
        paint_pattern(&mut frame, 10, 8);

        let result = detector.detect_face(&frame).unwrap();
        assert!(result.face_detected);
        let face = result.detection.unwrap();
        assert_eq!((face.width, face.height), (8, 8));
        assert!(count_color(&result.annotated, GREEN) > 0);
        // The input frame is never modified.
        assert_eq!(count_color(&frame, GREEN), 0);
    }

    #[test]
    fn test_detect_face_without_drawing() {
        let cascade = Cascade::from_xml(EDGE_CASCADE).unwrap();
        let detector = FaceDetector::from_cascades(
            cascade.clone(),
            cascade,
            DetectorOptions {
                face_params: pattern_params(),
                draw_bounding_boxes: false,
                ..DetectorOptions::default()
            },
        );
        let mut frame = Frame::filled(32, 32, DARK);
        paint_pattern(&mut frame, 10, 8);
        let result = detector.detect_face(&frame).unwrap();
        assert!(result.face_detected);
        assert_eq!(result.annotated.data, frame.data);
    }

    #[test]
    fn test_landmarks_without_roi() {
        let detector = test_detector();
        let frame = Frame::filled(16, 16, DARK);
        let result = detector.get_face_landmarks(&frame, None).unwrap();
        assert!(!result.landmarks_detected);
        assert!(result.landmarks.is_none());
    }

    #[test]
    fn test_landmarks_need_two_eyes() {
        let detector = test_detector();
        let frame = Frame::filled(64, 32, DARK);
        let roi = FaceRoi {
            frame: frame.clone(),
            rect: Rect::new(0, 0, 64, 32),
        };
        let result = detector.get_face_landmarks(&frame, Some(&roi)).unwrap();
        assert!(!result.landmarks_detected);
        assert_eq!(count_color(&result.annotated, BLUE), 0);
    }

    #[test]
    fn test_landmarks_found_with_two_eyes() {
        let detector = test_detector();
        let mut roi_frame = Frame::filled(64, 32, DARK);
        paint_pattern(&mut roi_frame, 10, 8);
        paint_pattern(&mut roi_frame, 40, 8);
        let roi = FaceRoi {
            frame: roi_frame,
            rect: Rect::new(100, 60, 64, 32),
        };

        let full = Frame::filled(200, 120, DARK);
        let result = detector.get_face_landmarks(&full, Some(&roi)).unwrap();
        assert!(result.landmarks_detected);

        let landmarks = result.landmarks.unwrap();
        assert!(landmarks.eye_count >= 2);
        assert_eq!(landmarks.face_region, roi.rect);
        // Eye boxes are drawn at the ROI offset in the full frame.
        for eye in landmarks.eyes_in_frame() {
            assert!(eye.x >= 100 && eye.y >= 60);
            assert_eq!(result.annotated.pixel(eye.x as u32, eye.y as u32), Some(BLUE));
        }
    }

    #[test]
    fn test_load_missing_dir() {
        let err = FaceDetector::load(Path::new("/nonexistent/cascades"), DetectorOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::CascadeLoad { which: "face", .. }));
    }

    #[test]
    fn test_load_requires_eye_cascade() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FACE_CASCADE_FILE), EDGE_CASCADE).unwrap();
        let err = FaceDetector::load(dir.path(), DetectorOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::CascadeLoad { which: "eye", .. }));

        std::fs::write(dir.path().join(EYE_CASCADE_FILE), EDGE_CASCADE).unwrap();
        assert!(FaceDetector::load(dir.path(), DetectorOptions::default()).is_ok());
    }
}
