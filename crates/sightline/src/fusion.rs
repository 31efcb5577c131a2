//! Proximity-based merge of object detections and text regions into UI elements.

use crate::detection::{ObjectDetector, TextRecognizer};
use crate::screenshot::Screenshot;
use crate::types::{DetectedObject, ElementKind, TextRegion, UIElement};
use crate::utils::text_contains;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Words that mark recognized text as the label of an input field.
pub const INPUT_FIELD_WORDS: &[&str] = &[
    "name", "email", "password", "address", "phone", "field", "input",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Max center distance (px) for pairing a detection with a text region.
    pub proximity_threshold: i32,
    /// Text regions and detections below this confidence are ignored.
    pub confidence_threshold: f64,
    /// Radius (px) around a text match searched for an owning visual element.
    pub search_radius: i32,
    pub case_sensitive: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: 50,
            confidence_threshold: 0.5,
            search_radius: 100,
            case_sensitive: false,
        }
    }
}

/// Whole-screen summary returned to tool callers.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenAnalysis {
    pub resolution: (u32, u32),
    pub elements: Vec<UIElement>,
    pub clickable: Vec<UIElement>,
    pub input_fields: Vec<UIElement>,
    pub combined_count: usize,
    pub text_count: usize,
    pub visual_count: usize,
}

/// Index of the nearest candidate within `threshold`, ties going to the earliest.
fn nearest_within<T>(
    origin: &crate::types::Point,
    candidates: &[T],
    threshold: i32,
    center: impl Fn(&T) -> crate::types::Point,
    available: impl Fn(usize) -> bool,
) -> Option<usize> {
    let limit = threshold as f64;
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        if !available(i) {
            continue;
        }
        let d = origin.distance(&center(candidate));
        if d > limit {
            continue;
        }
        // Strict comparison keeps the first-seen candidate on equal distance
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}

/// Merge detections and text regions.
///
/// Each detection takes the nearest unconsumed text region within `proximity_threshold`
/// and becomes a combined element; otherwise it stays visual. Text regions left over
/// become text elements. Output order is detections first, then leftover text.
pub fn fuse(
    detections: &[DetectedObject],
    text_regions: &[TextRegion],
    proximity_threshold: i32,
) -> Vec<UIElement> {
    let mut consumed = vec![false; text_regions.len()];
    let mut elements = Vec::with_capacity(detections.len() + text_regions.len());

    for det in detections {
        let origin = det.center();
        let hit = nearest_within(
            &origin,
            text_regions,
            proximity_threshold,
            |r| r.center(),
            |i| !consumed[i],
        );
        match hit {
            Some(i) => {
                consumed[i] = true;
                elements.push(UIElement::combined(det, &text_regions[i]));
            }
            None => elements.push(UIElement::visual(det)),
        }
    }

    for (region, used) in text_regions.iter().zip(consumed) {
        if !used {
            elements.push(UIElement::text(region));
        }
    }

    elements
}

/// Pair each text region containing `query` with the nearest detection within `radius`.
fn match_text(
    detections: &[DetectedObject],
    regions: &[TextRegion],
    query: &str,
    confidence_threshold: f64,
    search_radius: i32,
    case_sensitive: bool,
) -> Vec<UIElement> {
    let detections: Vec<&DetectedObject> = detections
        .iter()
        .filter(|d| d.confidence >= confidence_threshold)
        .collect();
    regions
        .iter()
        .filter(|r| r.confidence >= confidence_threshold)
        .filter(|r| text_contains(&r.text, query, case_sensitive))
        .map(|region| {
            match nearest_within(&region.center(), &detections, search_radius, |d| d.center(), |_| true) {
                Some(i) => UIElement::combined(detections[i], region),
                None => UIElement::text(region),
            }
        })
        .collect()
}

/// Raw output of one detector pass and one recognizer pass over the same frame.
#[derive(Debug, Clone, Default)]
pub struct Perception {
    pub detections: Vec<DetectedObject>,
    pub regions: Vec<TextRegion>,
}

/// Owns the perception backends and runs fusion on captured frames.
pub struct FusionEngine {
    detector: Arc<dyn ObjectDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        config: FusionConfig,
    ) -> Self {
        Self {
            detector,
            recognizer,
            config,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Arc<dyn TextRecognizer> {
        &self.recognizer
    }

    pub fn detector(&self) -> &Arc<dyn ObjectDetector> {
        &self.detector
    }

    /// Run both backends once over the whole frame.
    pub async fn perceive(&self, screenshot: &Screenshot) -> Result<Perception, AutomationError> {
        let detections = self.detector.detect(screenshot).await?;
        let regions = self.recognizer.read_text(screenshot, None).await?;
        Ok(Perception {
            detections,
            regions,
        })
    }

    /// Fuse an existing perception pass with the configured thresholds.
    pub fn fuse_perception(&self, perception: &Perception) -> Vec<UIElement> {
        let min = self.config.confidence_threshold;
        let detections: Vec<DetectedObject> = perception
            .detections
            .iter()
            .filter(|d| d.confidence >= min)
            .cloned()
            .collect();
        let regions: Vec<TextRegion> = perception
            .regions
            .iter()
            .filter(|r| r.confidence >= min && !r.text.is_empty())
            .cloned()
            .collect();
        let elements = fuse(&detections, &regions, self.config.proximity_threshold);
        debug!(
            detections = detections.len(),
            text_regions = regions.len(),
            elements = elements.len(),
            "Fused screen"
        );
        elements
    }

    /// `find_by_text` over an existing perception pass, with the configured defaults.
    pub fn match_perception(&self, perception: &Perception, query: &str) -> Vec<UIElement> {
        match_text(
            &perception.detections,
            &perception.regions,
            query,
            self.config.confidence_threshold,
            self.config.search_radius,
            self.config.case_sensitive,
        )
    }

    /// Detect, recognize and fuse one frame with the configured threshold.
    #[instrument(level = "debug", skip_all)]
    pub async fn fuse_screen(&self, screenshot: &Screenshot) -> Result<Vec<UIElement>, AutomationError> {
        let perception = self.perceive(screenshot).await?;
        Ok(self.fuse_perception(&perception))
    }

    /// Query-scoped lookup: text regions containing `query`, each paired with the nearest
    /// detection within `search_radius` when there is one.
    #[instrument(level = "debug", skip(self, screenshot))]
    pub async fn find_by_text(
        &self,
        screenshot: &Screenshot,
        query: &str,
        confidence_threshold: f64,
        search_radius: i32,
        case_sensitive: bool,
    ) -> Result<Vec<UIElement>, AutomationError> {
        let regions = self.recognizer.read_text(screenshot, None).await?;
        if !regions
            .iter()
            .any(|r| r.confidence >= confidence_threshold && text_contains(&r.text, query, case_sensitive))
        {
            return Ok(Vec::new());
        }

        let detections = self.detector.detect(screenshot).await?;
        let results = match_text(
            &detections,
            &regions,
            query,
            confidence_threshold,
            search_radius,
            case_sensitive,
        );

        debug!(matches = results.len(), "Text lookup finished");
        Ok(results)
    }

    /// Fused elements plus clickable and input-field subsets.
    pub async fn analyze(&self, screenshot: &Screenshot) -> Result<ScreenAnalysis, AutomationError> {
        let elements = self.fuse_screen(screenshot).await?;
        let clickable = elements.iter().filter(|e| e.is_clickable()).cloned().collect();
        let input_fields = elements
            .iter()
            .filter(|e| {
                e.folded_text()
                    .is_some_and(|t| INPUT_FIELD_WORDS.iter().any(|w| t.contains(w)))
            })
            .cloned()
            .collect();
        let count = |kind: ElementKind| elements.iter().filter(|e| e.kind == kind).count();
        let analysis = ScreenAnalysis {
            resolution: screenshot.resolution(),
            combined_count: count(ElementKind::Combined),
            text_count: count(ElementKind::Text),
            visual_count: count(ElementKind::Visual),
            clickable,
            input_fields,
            elements,
        };
        info!(
            total = analysis.elements.len(),
            clickable = analysis.clickable.len(),
            inputs = analysis.input_fields.len(),
            "Screen analyzed"
        );
        Ok(analysis)
    }
}
