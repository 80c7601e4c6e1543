//! Boosted Haar cascade classifier.
//!
//! Loads pre-trained cascades in the OpenCV XML layout (the
//! `haarcascade_*.xml` files shipped with OpenCV) and evaluates them over
//! an image pyramid with integral images and per-window variance
//! normalization. The trained data is treated as opaque: no training,
//! only the standard stage/weak-classifier evaluation rule.

use crate::grouping::{group_rectangles, GROUP_EPS};
use crate::integral::IntegralImage;
use crate::types::Rect;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

/// Stage thresholds are loosened by this much, as the trainer expects.
const STAGE_THRESHOLD_EPS: f32 = 1e-5;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cascade: {0}")]
    Parse(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("cascade has no stages")]
    Empty,
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
}

/// Tuning for [`Cascade::detect_multi_scale`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between scales; must be greater than 1.
    pub scale_factor: f64,
    /// Hits a cluster needs (exclusive) to be reported. Zero disables grouping.
    pub min_neighbors: usize,
    /// Smallest window reported, `(width, height)`.
    pub min_size: (u32, u32),
    /// Largest window reported; defaults to the image size.
    pub max_size: Option<(u32, u32)>,
}

impl DetectParams {
    /// Settings for the driver's face: coarse pyramid, strict grouping.
    pub fn face() -> Self {
        Self {
            scale_factor: 1.3,
            min_neighbors: 5,
            min_size: (30, 30),
            max_size: None,
        }
    }

    /// Settings for eyes inside a face ROI.
    pub fn eye() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
            max_size: None,
        }
    }

    fn validate(&self) -> Result<(), CascadeError> {
        if !(self.scale_factor > 1.0) {
            return Err(CascadeError::InvalidParams(format!(
                "scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct HaarRect {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    weight: f32,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<HaarRect>,
}

/// Internal tree node. Children `<= 0` index leaves by negation.
#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// A loaded boosted Haar cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    window_width: usize,
    window_height: usize,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

impl Cascade {
    /// Load a cascade XML file from disk.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let src = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml(&src)?;

        tracing::info!(
            path = %path.display(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            window = ?(cascade.window_width, cascade.window_height),
            "loaded cascade"
        );
        Ok(cascade)
    }

    /// Parse a cascade from its XML text.
    pub fn from_xml(src: &str) -> Result<Self, CascadeError> {
        let root = parse_tree(src)?;
        let cascade = root
            .child("cascade")
            .or_else(|| (root.name == "cascade").then_some(&root))
            .ok_or_else(|| {
                if root.children.iter().any(|c| c.child("stages").is_some()) {
                    CascadeError::Unsupported("legacy cascade layout".into())
                } else {
                    CascadeError::Parse("no <cascade> element".into())
                }
            })?;

        let stage_type = cascade.required_text("stageType")?;
        if stage_type != "BOOST" {
            return Err(CascadeError::Unsupported(format!("stage type {stage_type}")));
        }
        let feature_type = cascade.required_text("featureType")?;
        if feature_type != "HAAR" {
            return Err(CascadeError::Unsupported(format!("feature type {feature_type}")));
        }

        let window_width: usize = parse_num(cascade.required_text("width")?, "width")?;
        let window_height: usize = parse_num(cascade.required_text("height")?, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Parse(format!(
                "window {window_width}x{window_height} too small"
            )));
        }

        let features = cascade
            .required("features")?
            .items()
            .enumerate()
            .map(|(i, f)| parse_feature(i, f, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = cascade
            .required("stages")?
            .items()
            .enumerate()
            .map(|(i, s)| parse_stage(i, s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Empty);
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Training window size `(width, height)`.
    pub fn window_size(&self) -> (usize, usize) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Detect objects in an 8-bit grayscale plane.
    ///
    /// Returns rectangles in input-image coordinates, grouped according to
    /// `params.min_neighbors`.
    pub fn detect_multi_scale(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        params: &DetectParams,
    ) -> Result<Vec<Rect>, CascadeError> {
        params.validate()?;
        let (w, h) = (width as usize, height as usize);
        if gray.len() < w * h {
            return Err(CascadeError::InvalidParams(format!(
                "gray buffer too short: expected {}, got {}",
                w * h,
                gray.len()
            )));
        }
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        let (max_w, max_h) = params.max_size.unwrap_or((width, height));
        let mut candidates = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let win_w = (self.window_width as f64 * factor).round() as u32;
            let win_h = (self.window_height as f64 * factor).round() as u32;
            if win_w > max_w || win_h > max_h {
                break;
            }
            let scaled_w = (w as f64 / factor).round() as usize;
            let scaled_h = (h as f64 / factor).round() as usize;
            if scaled_w < self.window_width || scaled_h < self.window_height {
                break;
            }

            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                self.scan_level(gray, w, h, factor, scaled_w, scaled_h, &mut candidates);
            }
            factor *= params.scale_factor;
        }

        tracing::trace!(raw = candidates.len(), "cascade window hits");
        Ok(group_rectangles(&candidates, params.min_neighbors, GROUP_EPS))
    }

    /// Slide the window over one pyramid level.
    #[allow(clippy::too_many_arguments)]
    fn scan_level(
        &self,
        gray: &[u8],
        width: usize,
        height: usize,
        factor: f64,
        scaled_w: usize,
        scaled_h: usize,
        out: &mut Vec<Rect>,
    ) {
        let level = if scaled_w == width && scaled_h == height {
            IntegralImage::new(gray, width, height)
        } else {
            let resized = resize_bilinear(gray, width, height, scaled_w, scaled_h);
            IntegralImage::new(&resized, scaled_w, scaled_h)
        };

        let step = if factor > 2.0 { 1 } else { 2 };
        let win_w = (self.window_width as f64 * factor).round() as i32;
        let win_h = (self.window_height as f64 * factor).round() as i32;

        let mut y = 0;
        while y + self.window_height <= scaled_h {
            let mut x = 0;
            while x + self.window_width <= scaled_w {
                if self.evaluate_window(&level, x, y) {
                    out.push(Rect::new(
                        (x as f64 * factor).round() as i32,
                        (y as f64 * factor).round() as i32,
                        win_w,
                        win_h,
                    ));
                }
                x += step;
            }
            y += step;
        }
    }

    /// Run every stage on the window at `(x, y)`; true if all stages pass.
    fn evaluate_window(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        let inv_norm = self.variance_norm(ii, x, y);

        for stage in &self.stages {
            let mut sum = 0.0f32;
            for weak in &stage.classifiers {
                let mut idx: i32 = 0;
                loop {
                    let node = &weak.nodes[idx as usize];
                    let value = self.feature_value(node.feature, ii, x, y) * inv_norm;
                    idx = if value < node.threshold as f64 {
                        node.left
                    } else {
                        node.right
                    };
                    if idx <= 0 {
                        break;
                    }
                }
                sum += weak.leaves[(-idx) as usize];
            }
            if sum < stage.threshold {
                return false;
            }
        }
        true
    }

    /// Reciprocal of the window's contrast, measured one pixel inside the border.
    fn variance_norm(&self, ii: &IntegralImage, x: usize, y: usize) -> f64 {
        let nw = self.window_width - 2;
        let nh = self.window_height - 2;
        let area = (nw * nh) as f64;
        let s = ii.rect_sum(x + 1, y + 1, nw, nh);
        let sq = ii.rect_sqsum(x + 1, y + 1, nw, nh);
        let nf = area * sq - s * s;
        let nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };
        1.0 / nf
    }

    fn feature_value(&self, feature: usize, ii: &IntegralImage, x: usize, y: usize) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight as f64 * ii.rect_sum(x + r.x, y + r.y, r.w, r.h))
            .sum()
    }
}

/// Bilinear downscale/upscale of a gray plane, sampling at pixel centers.
fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;
    let mut resized = vec![0u8; new_w * new_h];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    resized
}

// --- XML ---

/// Minimal element tree; cascade files carry data only in text nodes.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required(&self, name: &str) -> Result<&XmlNode, CascadeError> {
        self.child(name)
            .ok_or_else(|| CascadeError::Parse(format!("missing <{name}> in <{}>", self.name)))
    }

    fn required_text(&self, name: &str) -> Result<&str, CascadeError> {
        Ok(self.required(name)?.text.trim())
    }

    /// Sequence entries, written as `<_>` elements.
    fn items(&self) -> impl Iterator<Item = &XmlNode> {
        self.children.iter().filter(|c| c.name == "_")
    }
}

fn parse_tree(src: &str) -> Result<XmlNode, CascadeError> {
    let mut reader = Reader::from_str(src);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(XmlNode {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..XmlNode::default()
            }),
            Ok(Event::Empty(e)) => {
                let node = XmlNode {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..XmlNode::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| CascadeError::Parse(format!("bad text: {e}")))?;
                if let Some(node) = stack.last_mut() {
                    if !node.text.is_empty() {
                        node.text.push(' ');
                    }
                    node.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| CascadeError::Parse("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(CascadeError::Parse("unbalanced end tag".into())),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CascadeError::Parse(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(CascadeError::Parse("unclosed element".into()));
    }
    let document = stack.pop().unwrap_or_default();
    // The document root (usually <opencv_storage>).
    document
        .children
        .into_iter()
        .next()
        .ok_or_else(|| CascadeError::Parse("empty document".into()))
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T, CascadeError> {
    s.trim()
        .parse()
        .map_err(|_| CascadeError::Parse(format!("bad {what}: {s:?}")))
}

fn parse_feature(
    index: usize,
    node: &XmlNode,
    window_width: usize,
    window_height: usize,
) -> Result<Feature, CascadeError> {
    if let Some(tilted) = node.child("tilted") {
        if tilted.text.trim() != "0" {
            return Err(CascadeError::Unsupported(format!(
                "tilted Haar feature #{index}"
            )));
        }
    }

    let mut rects = Vec::new();
    for r in node.required("rects")?.items() {
        let parts: Vec<&str> = r.text.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CascadeError::Parse(format!(
                "feature #{index}: rect needs 5 values, got {}",
                parts.len()
            )));
        }
        let rect = HaarRect {
            x: parse_num(parts[0], "rect x")?,
            y: parse_num(parts[1], "rect y")?,
            w: parse_num(parts[2], "rect width")?,
            h: parse_num(parts[3], "rect height")?,
            weight: parse_num(parts[4], "rect weight")?,
        };
        if rect.x + rect.w > window_width || rect.y + rect.h > window_height {
            return Err(CascadeError::Parse(format!(
                "feature #{index}: rect exceeds the detection window"
            )));
        }
        rects.push(rect);
    }

    if rects.is_empty() {
        return Err(CascadeError::Parse(format!("feature #{index} has no rects")));
    }
    Ok(Feature { rects })
}

fn parse_stage(index: usize, node: &XmlNode, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold: f32 = parse_num(node.required_text("stageThreshold")?, "stageThreshold")?;

    let classifiers = node
        .required("weakClassifiers")?
        .items()
        .map(|weak| parse_weak(index, weak, feature_count))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stage {
        threshold: threshold - STAGE_THRESHOLD_EPS,
        classifiers,
    })
}

fn parse_weak(stage: usize, node: &XmlNode, feature_count: usize) -> Result<WeakClassifier, CascadeError> {
    let raw: Vec<&str> = node.required_text("internalNodes")?.split_whitespace().collect();
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::Unsupported(format!(
            "stage {stage}: internal nodes must be groups of 4 values (categorical splits are not supported)"
        )));
    }

    let nodes = raw
        .chunks_exact(4)
        .map(|n| {
            Ok(Node {
                left: parse_num(n[0], "node left")?,
                right: parse_num(n[1], "node right")?,
                feature: parse_num(n[2], "node feature")?,
                threshold: parse_num(n[3], "node threshold")?,
            })
        })
        .collect::<Result<Vec<_>, CascadeError>>()?;

    let leaves = node
        .required_text("leafValues")?
        .split_whitespace()
        .map(|v| parse_num::<f32>(v, "leaf value"))
        .collect::<Result<Vec<_>, _>>()?;

    // Every child reference must land on a node or a leaf.
    for (i, n) in nodes.iter().enumerate() {
        if n.feature >= feature_count {
            return Err(CascadeError::Parse(format!(
                "stage {stage}: feature index {} out of range",
                n.feature
            )));
        }
        for child in [n.left, n.right] {
            // Internal references only point forward, so evaluation terminates.
            let ok = if child > 0 {
                (child as usize) > i && (child as usize) < nodes.len()
            } else {
                ((-child) as usize) < leaves.len()
            };
            if !ok {
                return Err(CascadeError::Parse(format!(
                    "stage {stage}: child reference {child} out of range"
                )));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}
