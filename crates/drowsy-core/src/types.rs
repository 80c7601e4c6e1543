use serde::{Deserialize, Serialize};

/// Axis-aligned integer rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Clip to `[0, width) x [0, height)`. May return an empty rect.
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x1 = self.x.clamp(0, width as i32);
        let y1 = self.y.clamp(0, height as i32);
        let x2 = self.right().clamp(0, width as i32);
        let y2 = self.bottom().clamp(0, height as i32);
        Rect::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0))
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Eye boxes found inside a face region, handed to the eye-analysis hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    /// Eye rectangles, relative to `face_region`.
    pub eyes: Vec<Rect>,
    pub eye_count: usize,
    /// Placement of the face ROI in frame coordinates.
    pub face_region: Rect,
}

impl Landmarks {
    pub fn new(eyes: Vec<Rect>, face_region: Rect) -> Self {
        Self {
            eye_count: eyes.len(),
            eyes,
            face_region,
        }
    }

    /// Eye rectangles in frame coordinates.
    pub fn eyes_in_frame(&self) -> Vec<Rect> {
        self.eyes
            .iter()
            .map(|e| e.translate(self.face_region.x, self.face_region.y))
            .collect()
    }
}

/// Face-mesh landmark indices the eye-analysis stage expects.
///
/// Corners and lids of both eyes (for eye-aspect-ratio), plus nose tip,
/// mouth corners and chin.
pub const LANDMARK_INDICES: [(&str, usize); 16] = [
    ("left_eye_left", 33),
    ("left_eye_right", 133),
    ("right_eye_left", 362),
    ("right_eye_right", 263),
    ("left_eye_top", 159),
    ("left_eye_bottom", 145),
    ("left_eye_inner", 160),
    ("left_eye_outer", 33),
    ("right_eye_top", 386),
    ("right_eye_bottom", 374),
    ("right_eye_inner", 387),
    ("right_eye_outer", 263),
    ("nose_tip", 4),
    ("mouth_left", 61),
    ("mouth_right", 291),
    ("chin", 152),
];

/// Look up a landmark index by name.
pub fn landmark_index(name: &str) -> Option<usize> {
    LANDMARK_INDICES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, idx)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_edges_and_area() {
        let r = Rect::new(10, 20, 30, 40);
        assert_eq!(r.right(), 40);
        assert_eq!(r.bottom(), 60);
        assert_eq!(r.area(), 1200);
        assert!(!r.is_empty());
        assert!(Rect::new(0, 0, 0, 5).is_empty());
    }

    #[test]
    fn test_rect_clamp_inside_is_identity() {
        let r = Rect::new(5, 5, 10, 10);
        assert_eq!(r.clamp_to(100, 100), r);
    }

    #[test]
    fn test_rect_clamp_overhanging() {
        let r = Rect::new(-5, -3, 20, 20);
        assert_eq!(r.clamp_to(10, 12), Rect::new(0, 0, 10, 12));
    }

    #[test]
    fn test_rect_clamp_outside_is_empty() {
        let r = Rect::new(50, 50, 10, 10);
        assert!(r.clamp_to(20, 20).is_empty());
    }

    #[test]
    fn test_landmarks_eyes_in_frame() {
        let lm = Landmarks::new(
            vec![Rect::new(2, 3, 10, 8), Rect::new(20, 3, 10, 8)],
            Rect::new(100, 50, 60, 60),
        );
        assert_eq!(lm.eye_count, 2);
        assert_eq!(
            lm.eyes_in_frame(),
            vec![Rect::new(102, 53, 10, 8), Rect::new(120, 53, 10, 8)]
        );
    }

    #[test]
    fn test_landmark_index_lookup() {
        assert_eq!(landmark_index("nose_tip"), Some(4));
        assert_eq!(landmark_index("right_eye_top"), Some(386));
        assert_eq!(landmark_index("left_eye_outer"), landmark_index("left_eye_left"));
        assert_eq!(landmark_index("forehead"), None);
    }

    #[test]
    fn test_landmarks_serialize() {
        let lm = Landmarks::new(vec![Rect::new(1, 2, 3, 4)], Rect::new(0, 0, 9, 9));
        let json = serde_json::to_value(&lm).unwrap();
        assert_eq!(json["eye_count"], 1);
        assert_eq!(json["eyes"][0]["width"], 3);
        assert_eq!(json["face_region"]["height"], 9);
    }
}
