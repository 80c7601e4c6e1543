use anyhow::{bail, Context, Result};
use drowsy_core::{DetectParams, DetectorOptions, DEFAULT_CASCADE_DIR};
use drowsy_hw::CameraSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration.
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `DROWSY_*` environment variables, then command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Camera index, opened as `/dev/video{index}`.
    pub camera_index: u32,
    /// Explicit V4L2 device path; takes precedence over `camera_index`.
    pub camera_device: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: u32,
    pub autofocus: bool,
    /// Number of capture buffers. Lower means less latency.
    pub buffer_count: u32,
    /// Directory holding `haarcascade_frontalface_default.xml` and `haarcascade_eye.xml`.
    pub cascade_dir: PathBuf,
    pub face_scale_factor: f64,
    pub face_min_neighbors: usize,
    /// Smallest face reported, in pixels (square).
    pub face_min_size: u32,
    pub eye_scale_factor: f64,
    pub eye_min_neighbors: usize,
    /// Margin around the face crop, as a fraction of the face width.
    pub roi_margin: f32,
    pub draw_bounding_boxes: bool,
    pub window_name: String,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
    /// Run detection on every Nth frame; 1 processes all frames.
    pub frame_skip: usize,
    /// Frames measured by `drowsy bench`.
    pub bench_frames: usize,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let face = DetectParams::face();
        let eye = DetectParams::eye();
        Self {
            camera_index: 0,
            camera_device: None,
            frame_width: 640,
            frame_height: 480,
            target_fps: 30,
            autofocus: true,
            buffer_count: 2,
            cascade_dir: PathBuf::from(DEFAULT_CASCADE_DIR),
            face_scale_factor: face.scale_factor,
            face_min_neighbors: face.min_neighbors,
            face_min_size: face.min_size.0,
            eye_scale_factor: eye.scale_factor,
            eye_min_neighbors: eye.min_neighbors,
            roi_margin: 0.1,
            draw_bounding_boxes: true,
            window_name: "Driver Drowsiness Detection".to_string(),
            warmup_frames: 5,
            frame_skip: 1,
            bench_frames: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, the config file (explicit path or `DROWSY_CONFIG`),
    /// and environment overrides.
    ///
    /// Also returns the overrides that were ignored, so they can be logged
    /// once the subscriber is up.
    pub fn load(path: Option<&Path>) -> Result<(Self, Vec<IgnoredOverride>)> {
        let env_path = std::env::var("DROWSY_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        let ignored = config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, ignored))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Apply `DROWSY_*` overrides. Unparseable values are skipped and
    /// returned.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<IgnoredOverride> {
        let mut ignored = Vec::new();
        let mut parsed = Overrides {
            lookup: &lookup,
            ignored: &mut ignored,
        };

        parsed.apply("DROWSY_CAMERA_INDEX", &mut self.camera_index);
        if let Some(dev) = lookup("DROWSY_CAMERA_DEVICE") {
            self.camera_device = Some(dev);
        }
        parsed.apply("DROWSY_FRAME_WIDTH", &mut self.frame_width);
        parsed.apply("DROWSY_FRAME_HEIGHT", &mut self.frame_height);
        parsed.apply("DROWSY_TARGET_FPS", &mut self.target_fps);
        if let Some(dir) = lookup("DROWSY_CASCADE_DIR") {
            self.cascade_dir = PathBuf::from(dir);
        }
        parsed.apply("DROWSY_WARMUP_FRAMES", &mut self.warmup_frames);
        parsed.apply("DROWSY_FRAME_SKIP", &mut self.frame_skip);
        parsed.apply("DROWSY_ROI_MARGIN", &mut self.roi_margin);
        if let Some(level) = lookup("DROWSY_LOG_LEVEL") {
            self.log_level = level;
        }
        ignored
    }

    /// Select a camera by index from the command line. An index given here
    /// wins over a device path from the file or environment.
    pub fn select_camera(&mut self, index: Option<u32>) {
        if let Some(index) = index {
            self.camera_index = index;
            self.camera_device = None;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            bail!("frame size must be non-zero, got {}x{}", self.frame_width, self.frame_height);
        }
        if self.face_scale_factor <= 1.0 || self.eye_scale_factor <= 1.0 {
            bail!("cascade scale factors must be greater than 1.0");
        }
        if !(0.0..=1.0).contains(&self.roi_margin) {
            bail!("roi_margin must be within 0.0..=1.0, got {}", self.roi_margin);
        }
        if self.frame_skip == 0 {
            bail!("frame_skip must be at least 1");
        }
        Ok(())
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            index: self.camera_index,
            device_path: self.camera_device.clone(),
            width: self.frame_width,
            height: self.frame_height,
            target_fps: self.target_fps,
            autofocus: self.autofocus,
            buffer_count: self.buffer_count,
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            face_params: DetectParams {
                scale_factor: self.face_scale_factor,
                min_neighbors: self.face_min_neighbors,
                min_size: (self.face_min_size, self.face_min_size),
                max_size: None,
            },
            eye_params: DetectParams {
                scale_factor: self.eye_scale_factor,
                min_neighbors: self.eye_min_neighbors,
                ..DetectParams::eye()
            },
            roi_margin: self.roi_margin,
            draw_bounding_boxes: self.draw_bounding_boxes,
        }
    }
}

/// An environment override whose value did not parse.
#[derive(Debug, Clone, PartialEq)]
pub struct IgnoredOverride {
    pub key: &'static str,
    pub value: String,
}

struct Overrides<'a, F> {
    lookup: &'a F,
    ignored: &'a mut Vec<IgnoredOverride>,
}

impl<F: Fn(&str) -> Option<String>> Overrides<'_, F> {
    fn apply<T: std::str::FromStr>(&mut self, key: &'static str, slot: &mut T) {
        let Some(raw) = (self.lookup)(key) else {
            return;
        };
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => self.ignored.push(IgnoredOverride { key, value: raw }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_detection_constants() {
        let config = Config::default();
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.face_scale_factor, 1.3);
        assert_eq!(config.face_min_neighbors, 5);
        assert_eq!(config.face_min_size, 30);
        assert_eq!(config.roi_margin, 0.1);
        assert_eq!(config.warmup_frames, 5);
        assert_eq!(config.frame_skip, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drowsy.toml");
        std::fs::write(
            &path,
            "camera_index = 2\nframe_width = 1280\nframe_height = 720\ncascade_dir = \"/opt/cascades\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_index, 2);
        assert_eq!((config.frame_width, config.frame_height), (1280, 720));
        assert_eq!(config.cascade_dir, PathBuf::from("/opt/cascades"));
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.face_min_neighbors, 5);
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drowsy.toml");
        std::fs::write(&path, "camera_idx = 2\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::from_file(Path::new("/nonexistent/drowsy.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("DROWSY_CAMERA_INDEX", "1"),
            ("DROWSY_CAMERA_DEVICE", "/dev/video9"),
            ("DROWSY_FRAME_SKIP", "3"),
            ("DROWSY_ROI_MARGIN", "0.25"),
            ("DROWSY_CASCADE_DIR", "/tmp/cascades"),
        ]));
        assert_eq!(config.camera_index, 1);
        assert_eq!(config.camera_device.as_deref(), Some("/dev/video9"));
        assert_eq!(config.frame_skip, 3);
        assert_eq!(config.roi_margin, 0.25);
        assert_eq!(config.cascade_dir, PathBuf::from("/tmp/cascades"));
        assert_eq!(config.camera_settings().device_path(), "/dev/video9");
    }

    #[test]
    fn test_bad_env_value_ignored_and_reported() {
        let mut config = Config::default();
        let ignored = config.apply_overrides(lookup_from(&[
            ("DROWSY_TARGET_FPS", "fast"),
            ("DROWSY_FRAME_SKIP", "2"),
        ]));
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.frame_skip, 2);
        assert_eq!(
            ignored,
            vec![IgnoredOverride {
                key: "DROWSY_TARGET_FPS",
                value: "fast".to_string(),
            }]
        );
    }

    #[test]
    fn test_valid_overrides_report_nothing() {
        let mut config = Config::default();
        let ignored = config.apply_overrides(lookup_from(&[("DROWSY_ROI_MARGIN", " 0.2 ")]));
        assert!(ignored.is_empty());
        assert_eq!(config.roi_margin, 0.2);
    }

    #[test]
    fn test_camera_flag_wins_over_device_path() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("DROWSY_CAMERA_DEVICE", "/dev/video2")]));
        assert_eq!(config.camera_settings().device_path(), "/dev/video2");

        config.select_camera(Some(0));
        assert_eq!(config.camera_device, None);
        assert_eq!(config.camera_settings().device_path(), "/dev/video0");
    }

    #[test]
    fn test_no_camera_flag_keeps_device_path() {
        let mut config = Config {
            camera_device: Some("/dev/video5".to_string()),
            ..Config::default()
        };
        config.select_camera(None);
        assert_eq!(config.camera_settings().device_path(), "/dev/video5");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            Config { frame_skip: 0, ..Config::default() },
            Config { roi_margin: 1.5, ..Config::default() },
            Config { face_scale_factor: 1.0, ..Config::default() },
            Config { frame_width: 0, ..Config::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_detector_options_mapping() {
        let config = Config {
            face_min_size: 48,
            eye_min_neighbors: 4,
            draw_bounding_boxes: false,
            ..Config::default()
        };
        let options = config.detector_options();
        assert_eq!(options.face_params.min_size, (48, 48));
        assert_eq!(options.eye_params.min_neighbors, 4);
        assert_eq!(options.eye_params.scale_factor, 1.1);
        assert!(!options.draw_bounding_boxes);
    }
}
