//! drowsy-core — Face and eye detection engine.
//!
//! Evaluates pre-trained Haar cascades in pure Rust, keeps the driver's
//! (largest) face, and finds eyes inside a margin-expanded face crop.

pub mod cascade;
pub mod detector;
pub mod draw;
pub mod grouping;
pub mod integral;
pub mod types;

pub use cascade::{Cascade, CascadeError, DetectParams};
pub use detector::{
    DetectorError, DetectorOptions, FaceDetector, FaceResult, FaceRoi, LandmarkResult,
    DEFAULT_CASCADE_DIR,
};
pub use types::{landmark_index, Landmarks, Rect, LANDMARK_INDICES};
