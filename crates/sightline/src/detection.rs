//! Contracts for the two perception backends consumed by the fusion engine.

use crate::screenshot::Screenshot;
use crate::types::{BBox, DetectedObject, TextRegion};
use crate::AutomationError;
use async_trait::async_trait;

/// Produces labeled bounding boxes for one frame.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, screenshot: &Screenshot) -> Result<Vec<DetectedObject>, AutomationError>;
}

/// Produces text regions for one frame, optionally restricted to `region`.
///
/// Implementations must report coordinates in full-frame pixels even when a region is given.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn read_text(
        &self,
        screenshot: &Screenshot,
        region: Option<BBox>,
    ) -> Result<Vec<TextRegion>, AutomationError>;
}

/// Run `recognizer` on a cropped copy of `region` and map results back to frame coordinates.
///
/// Adapters whose backend cannot restrict recognition to a region use this to honour the
/// `region` argument.
pub async fn read_text_in_region<R: TextRecognizer + ?Sized>(
    recognizer: &R,
    screenshot: &Screenshot,
    region: BBox,
) -> Result<Vec<TextRegion>, AutomationError> {
    let (crop, (dx, dy)) = screenshot.crop(&region)?;
    let regions = recognizer.read_text(&crop, None).await?;
    Ok(regions.into_iter().map(|r| r.translate(dx, dy)).collect())
}

/// Drop regions whose center falls outside `region`.
pub fn filter_to_region(regions: Vec<TextRegion>, region: &BBox) -> Vec<TextRegion> {
    regions
        .into_iter()
        .filter(|r| region.contains(&r.center()))
        .collect()
}
