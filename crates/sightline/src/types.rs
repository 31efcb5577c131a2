//! Common types shared by the detection, fusion, location and verification layers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Visual labels that usually denote something a user can click.
pub const CLICKABLE_LABELS: &[&str] = &[
    "button",
    "icon",
    "link",
    "checkbox",
    "menu",
    "tab",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "book",
];

/// Words that mark a text element as a probable button caption.
pub const BUTTON_WORDS: &[&str] = &[
    "button", "click", "submit", "ok", "cancel", "close", "save", "open", "login", "sign", "next",
    "back", "menu", "settings", "yes", "no", "delete",
];

/// Max length/word count for text to count as a short, clickable caption.
const CLICKABLE_MAX_CHARS: usize = 20;
const CLICKABLE_MAX_WORDS: usize = 3;

/// A pixel position on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x as i64 - other.x as i64) as f64;
        let dy = (self.y as i64 - other.y as i64) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned bounding box `[x1, y1, x2, y2]` in absolute pixels.
///
/// Constructors normalise the corners so that `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Smallest box containing every point, or `None` for an empty slice.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BBox::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            bbox.x1 = bbox.x1.min(p.x);
            bbox.y1 = bbox.y1.min(p.y);
            bbox.x2 = bbox.x2.max(p.x);
            bbox.y2 = bbox.y2.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    pub fn area(&self) -> i64 {
        self.width().saturating_mul(self.height())
    }

    /// Midpoint of the box. Integer division keeps it inside the box, and the result
    /// lies between two i32 corners so it always fits back into i32.
    pub fn center(&self) -> Point {
        Point::new(
            (self.x1 as i64 + self.width() / 2) as i32,
            (self.y1 as i64 + self.height() / 2) as i32,
        )
    }

    /// Coordinate-wise union of two boxes.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x1 && p.x <= self.x2 && p.y >= self.y1 && p.y <= self.y2
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> BBox {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        BBox::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
    }

    pub fn translate(&self, dx: i32, dy: i32) -> BBox {
        BBox::new(
            self.x1.saturating_add(dx),
            self.y1.saturating_add(dy),
            self.x2.saturating_add(dx),
            self.y2.saturating_add(dy),
        )
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{},{}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// One object-detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub bbox: BBox,
    pub label: String,
    /// 0.0..=1.0
    pub confidence: f64,
}

impl DetectedObject {
    pub fn new(bbox: BBox, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn center(&self) -> Point {
        self.bbox.center()
    }
}

/// One text-recognizer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    /// Outline as reported by the recognizer, at least three points.
    pub polygon: Vec<Point>,
    /// Axis-aligned box around `polygon`.
    pub rect: BBox,
    pub text: String,
    pub confidence: f64,
}

impl TextRegion {
    /// Build a region from a recognizer polygon. Returns `None` for degenerate
    /// polygons (fewer than three points).
    pub fn from_polygon(polygon: Vec<Point>, text: impl Into<String>, confidence: f64) -> Option<Self> {
        if polygon.len() < 3 {
            return None;
        }
        let rect = BBox::from_points(&polygon)?;
        Some(Self {
            polygon,
            rect,
            text: text.into().trim().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Build a region from a plain rectangle.
    pub fn from_rect(rect: BBox, text: impl Into<String>, confidence: f64) -> Self {
        let polygon = vec![
            Point::new(rect.x1, rect.y1),
            Point::new(rect.x2, rect.y1),
            Point::new(rect.x2, rect.y2),
            Point::new(rect.x1, rect.y2),
        ];
        Self {
            polygon,
            rect,
            text: text.into().trim().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn center(&self) -> Point {
        self.rect.center()
    }

    /// Shift the region, used to map crop-relative results back to frame coordinates.
    pub fn translate(mut self, dx: i32, dy: i32) -> Self {
        for p in &mut self.polygon {
            p.x = p.x.saturating_add(dx);
            p.y = p.y.saturating_add(dy);
        }
        self.rect = self.rect.translate(dx, dy);
        self
    }
}

/// Where a fused element came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Visual,
    Text,
    Combined,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Visual => write!(f, "visual"),
            ElementKind::Text => write!(f, "text"),
            ElementKind::Combined => write!(f, "combined"),
        }
    }
}

/// A fused, addressable screen target.
///
/// `center` is always the midpoint of `bbox`. For `Combined` elements the box is
/// the union of both source boxes and the confidence is their mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    pub kind: ElementKind,
    pub bbox: BBox,
    pub center: Point,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub description: String,
}

impl UIElement {
    pub fn visual(det: &DetectedObject) -> Self {
        Self {
            kind: ElementKind::Visual,
            bbox: det.bbox,
            center: det.bbox.center(),
            confidence: det.confidence,
            text: None,
            label: Some(det.label.clone()),
            description: format!("Detected {}", det.label),
        }
    }

    pub fn text(region: &TextRegion) -> Self {
        Self {
            kind: ElementKind::Text,
            bbox: region.rect,
            center: region.rect.center(),
            confidence: region.confidence,
            text: Some(region.text.clone()),
            label: None,
            description: format!("Text: '{}'", region.text),
        }
    }

    pub fn combined(det: &DetectedObject, region: &TextRegion) -> Self {
        let bbox = det.bbox.union(&region.rect);
        Self {
            kind: ElementKind::Combined,
            bbox,
            center: bbox.center(),
            confidence: (det.confidence + region.confidence) / 2.0,
            text: Some(region.text.clone()),
            label: Some(det.label.clone()),
            description: format!("{}: '{}'", det.label, region.text),
        }
    }

    /// Case-folded text, if any.
    pub fn folded_text(&self) -> Option<String> {
        self.text.as_deref().map(crate::utils::normalize)
    }

    /// Heuristic: short captions, button words and clickable visual labels.
    pub fn is_clickable(&self) -> bool {
        if let Some(label) = &self.label {
            let label = label.to_lowercase();
            if CLICKABLE_LABELS.contains(&label.as_str()) {
                return true;
            }
        }
        match &self.text {
            Some(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return false;
                }
                let short = trimmed.chars().count() <= CLICKABLE_MAX_CHARS
                    && trimmed.split_whitespace().count() <= CLICKABLE_MAX_WORDS;
                let lower = trimmed.to_lowercase();
                short || BUTTON_WORDS.iter().any(|w| lower.contains(w))
            }
            None => false,
        }
    }
}

/// Outcome of a post-action check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub message: String,
    /// Heuristic strength of evidence, 0.0..=1.0
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub found_elements: Vec<UIElement>,
}

impl VerificationResult {
    pub fn success(message: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: true,
            message: message.into(),
            confidence: confidence.clamp(0.0, 1.0),
            found_elements: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: false,
            message: message.into(),
            confidence: confidence.clamp(0.0, 1.0),
            found_elements: Vec::new(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<UIElement>) -> Self {
        self.found_elements = elements;
        self
    }

    /// Turn a failed verification into `VerificationFailed`.
    pub fn into_result(self) -> Result<Self, crate::AutomationError> {
        if self.success {
            Ok(self)
        } else {
            Err(crate::AutomationError::VerificationFailed(self.message))
        }
    }
}

/// Outcome of the identity check that gates the action phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub success: bool,
    pub message: String,
    pub verified_fields: Vec<String>,
    pub missing_fields: Vec<String>,
    /// Recognized banner lines. Carries identity data, never log it blindly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub banner_text: Vec<String>,
    /// Always true for identity checks.
    pub safety_critical: bool,
}

/// What a click is expected to cause on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedChange {
    #[default]
    Any,
    Dialog,
    PageChange,
}

impl std::str::FromStr for ExpectedChange {
    type Err = crate::AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" | "" => Ok(ExpectedChange::Any),
            "dialog" => Ok(ExpectedChange::Dialog),
            "page_change" | "page" => Ok(ExpectedChange::PageChange),
            other => Err(crate::AutomationError::Configuration(format!(
                "unknown expected change kind '{other}'"
            ))),
        }
    }
}

/// Type of mouse button to press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollDirection::Up => write!(f, "up"),
            ScrollDirection::Down => write!(f, "down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_normalises_corners() {
        let b = BBox::new(50, 40, 10, 20);
        assert_eq!(b, BBox::new(10, 20, 50, 40));
        assert_eq!(b.width(), 40);
        assert_eq!(b.height(), 20);
    }

    #[test]
    fn test_center_inside_odd_box() {
        let b = BBox::new(3, 3, 4, 4);
        assert!(b.contains(&b.center()));
        let b = BBox::new(-7, -3, 0, 0);
        assert!(b.contains(&b.center()));
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        let b = BBox::new(i32::MIN, 0, i32::MAX, 10);
        assert_eq!(b.width(), u32::MAX as i64);
        let c = b.center();
        assert!(b.contains(&c));
        assert_eq!(c, Point::new(-1, 5));
        assert!(Point::new(i32::MIN, 0).distance(&Point::new(i32::MAX, 0)) > 4.0e9);

        let clamped = b.clamp_to(1920, 1080);
        assert_eq!(clamped, BBox::new(0, 0, 1920, 10));
        assert_eq!(clamped.center(), Point::new(960, 5));
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        assert!(TextRegion::from_polygon(vec![Point::new(0, 0), Point::new(5, 5)], "x", 0.9).is_none());
        let r = TextRegion::from_polygon(
            vec![Point::new(10, 12), Point::new(40, 10), Point::new(42, 30)],
            " Save ",
            0.8,
        )
        .unwrap();
        assert_eq!(r.rect, BBox::new(10, 10, 42, 30));
        assert_eq!(r.text, "Save");
    }

    #[test]
    fn test_combined_element_invariants() {
        let det = DetectedObject::new(BBox::new(400, 300, 500, 350), "button", 0.8);
        let txt = TextRegion::from_rect(BBox::new(420, 320, 460, 340), "Submit", 0.6);
        let el = UIElement::combined(&det, &txt);
        assert_eq!(el.kind, ElementKind::Combined);
        assert_eq!(el.bbox, BBox::new(400, 300, 500, 350));
        assert!((el.confidence - 0.7).abs() < 1e-9);
        assert!(el.bbox.contains(&el.center));
        assert_eq!(el.description, "button: 'Submit'");
    }

    #[test]
    fn test_clickable_heuristic() {
        let short = UIElement::text(&TextRegion::from_rect(BBox::new(0, 0, 10, 10), "OK", 0.9));
        assert!(short.is_clickable());

        let long = UIElement::text(&TextRegion::from_rect(
            BBox::new(0, 0, 10, 10),
            "This paragraph explains the terms of the agreement",
            0.9,
        ));
        assert!(!long.is_clickable());

        let icon = UIElement::visual(&DetectedObject::new(BBox::new(0, 0, 10, 10), "icon", 0.9));
        assert!(icon.is_clickable());

        let person = UIElement::visual(&DetectedObject::new(BBox::new(0, 0, 10, 10), "person", 0.9));
        assert!(!person.is_clickable());
    }

    #[test]
    fn test_expected_change_parse() {
        assert_eq!("dialog".parse::<ExpectedChange>().unwrap(), ExpectedChange::Dialog);
        assert_eq!("page_change".parse::<ExpectedChange>().unwrap(), ExpectedChange::PageChange);
        assert!("explode".parse::<ExpectedChange>().is_err());
    }
}
