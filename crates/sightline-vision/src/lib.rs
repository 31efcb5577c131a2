//! HTTP clients for the perception services.
//!
//! Both services take a base64 PNG and answer with JSON. Boxes may come back in
//! absolute pixels or normalized to 0-1 (`"normalized": true`); either way they are
//! converted to pixel coordinates of the submitted frame.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sightline::detection::read_text_in_region;
use sightline::{
    AutomationError, BBox, DetectedObject, ObjectDetector, Point, Screenshot, TextRecognizer,
    TextRegion,
};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DETECTOR_URL_ENV: &str = "SIGHTLINE_DETECTOR_URL";
pub const OCR_URL_ENV: &str = "SIGHTLINE_OCR_URL";

const DEFAULT_DETECTOR_URL: &str = "http://127.0.0.1:8700/detect";
const DEFAULT_OCR_URL: &str = "http://127.0.0.1:8701/ocr";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct RawDetection {
    bbox: [f64; 4],
    label: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
    #[serde(default)]
    normalized: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTextRegion {
    /// Quadrilateral corners `[[x, y], ...]`
    polygon: Option<Vec<[f64; 2]>>,
    bbox: Option<[f64; 4]>,
    text: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    regions: Vec<RawTextRegion>,
    #[serde(default)]
    normalized: bool,
    error: Option<String>,
}

fn to_px(v: f64, extent: u32, normalized: bool) -> i32 {
    if normalized {
        (v * extent as f64).round() as i32
    } else {
        v.round() as i32
    }
}

/// Pixel box clamped to the frame, so later arithmetic never sees wild coordinates.
fn to_bbox(b: [f64; 4], width: u32, height: u32, normalized: bool) -> BBox {
    let [x1, y1, x2, y2] = b;
    BBox::new(
        to_px(x1, width, normalized),
        to_px(y1, height, normalized),
        to_px(x2, width, normalized),
        to_px(y2, height, normalized),
    )
    .clamp_to(width, height)
}

fn to_point([x, y]: [f64; 2], width: u32, height: u32, normalized: bool) -> Point {
    let max_x = i32::try_from(width).unwrap_or(i32::MAX);
    let max_y = i32::try_from(height).unwrap_or(i32::MAX);
    Point::new(
        to_px(x, width, normalized).clamp(0, max_x),
        to_px(y, height, normalized).clamp(0, max_y),
    )
}

/// Convert a detector response body into pixel-space detections.
pub fn parse_detections(body: &str, width: u32, height: u32) -> Result<Vec<DetectedObject>> {
    let resp: DetectResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Failed to parse detector response: {}", e))?;
    if let Some(error) = resp.error {
        return Err(anyhow!("Detector error: {}", error));
    }
    Ok(resp
        .detections
        .into_iter()
        .map(|d| {
            DetectedObject::new(
                to_bbox(d.bbox, width, height, resp.normalized),
                d.label,
                d.confidence,
            )
        })
        .collect())
}

/// Convert an OCR response body into pixel-space text regions. Entries with neither a
/// usable polygon nor a box are dropped.
pub fn parse_text_regions(body: &str, width: u32, height: u32) -> Result<Vec<TextRegion>> {
    let resp: OcrResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Failed to parse OCR response: {}", e))?;
    if let Some(error) = resp.error {
        return Err(anyhow!("OCR error: {}", error));
    }
    let normalized = resp.normalized;
    let mut out = Vec::with_capacity(resp.regions.len());
    for raw in resp.regions {
        let from_polygon = raw.polygon.and_then(|pts| {
            let pts: Vec<Point> = pts
                .iter()
                .map(|p| to_point(*p, width, height, normalized))
                .collect();
            TextRegion::from_polygon(pts, raw.text.clone(), raw.confidence)
        });
        let region = from_polygon.or_else(|| {
            raw.bbox.map(|b| {
                TextRegion::from_rect(to_bbox(b, width, height, normalized), raw.text.clone(), raw.confidence)
            })
        });
        match region {
            Some(r) => out.push(r),
            None => debug!("Dropping OCR entry without geometry: {:?}", raw.text),
        }
    }
    Ok(out)
}

/// Endpoint settings shared by both clients.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub url: String,
    pub timeout: Duration,
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    fn from_env_or(var: &str, default: &str) -> Self {
        Self::new(env::var(var).unwrap_or_else(|_| default.to_string()))
    }
}

struct Endpoint {
    client: reqwest::Client,
    url: String,
}

impl Endpoint {
    fn new(config: ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url,
        })
    }

    async fn post_image(&self, shot: &Screenshot, service: &str) -> Result<String> {
        let image = shot
            .to_base64_png()
            .map_err(|e| anyhow!("Failed to encode frame: {}", e))?;
        let (width, height) = shot.resolution();
        debug!("Calling {} at {} (image: {}x{})", service, self.url, width, height);

        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "image": image }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!("{} error: {} - {}", service, status, text);
            return Err(anyhow!("{} error ({}): {}", service, status, text));
        }
        Ok(resp.text().await?)
    }
}

fn recognition_error(e: anyhow::Error) -> AutomationError {
    AutomationError::Recognition(e.to_string())
}

/// Object detector backed by an HTTP service.
pub struct HttpDetector {
    endpoint: Endpoint,
}

impl HttpDetector {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }

    /// Uses `SIGHTLINE_DETECTOR_URL`, falling back to a local service.
    pub fn from_env() -> Result<Self> {
        Self::new(ServiceConfig::from_env_or(DETECTOR_URL_ENV, DEFAULT_DETECTOR_URL))
    }

    async fn detect_inner(&self, shot: &Screenshot) -> Result<Vec<DetectedObject>> {
        let body = self.endpoint.post_image(shot, "Detector").await?;
        let detections = parse_detections(&body, shot.width(), shot.height())?;
        info!("Detector returned {} objects", detections.len());
        Ok(detections)
    }
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(&self, screenshot: &Screenshot) -> Result<Vec<DetectedObject>, AutomationError> {
        self.detect_inner(screenshot).await.map_err(recognition_error)
    }
}

/// Text recognizer backed by an HTTP OCR service. Region reads crop locally first.
pub struct HttpTextRecognizer {
    endpoint: Endpoint,
}

impl HttpTextRecognizer {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }

    /// Uses `SIGHTLINE_OCR_URL`, falling back to a local service.
    pub fn from_env() -> Result<Self> {
        Self::new(ServiceConfig::from_env_or(OCR_URL_ENV, DEFAULT_OCR_URL))
    }

    async fn read_inner(&self, shot: &Screenshot) -> Result<Vec<TextRegion>> {
        let body = self.endpoint.post_image(shot, "OCR").await?;
        let regions = parse_text_regions(&body, shot.width(), shot.height())?;
        info!("OCR returned {} text regions", regions.len());
        Ok(regions)
    }
}

#[async_trait]
impl TextRecognizer for HttpTextRecognizer {
    async fn read_text(
        &self,
        screenshot: &Screenshot,
        region: Option<BBox>,
    ) -> Result<Vec<TextRegion>, AutomationError> {
        match region {
            Some(r) => read_text_in_region(self, screenshot, r).await,
            None => self.read_inner(screenshot).await.map_err(recognition_error),
        }
    }
}
