//! Decides whether an action had the intended effect from screenshots and recognized text.

use crate::fusion::FusionEngine;
use crate::locator::ElementLocator;
use crate::screenshot::Screenshot;
use crate::session::Session;
use crate::types::{BBox, ExpectedChange, VerificationResult};
use crate::utils::normalize;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Per-channel difference above which a pixel counts as changed
    pub pixel_threshold: u8,
    /// Changed-pixel percentage below which a click had no visible effect
    pub min_change_percent: f64,
    pub wait_attempts: u32,
    pub wait_delay_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 10,
            min_change_percent: 1.0,
            wait_attempts: 10,
            wait_delay_ms: 1000,
        }
    }
}

/// Frame similarity metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenComparison {
    /// 1 - MSE / 255^2
    pub similarity: f64,
    pub mse: f64,
    pub change_percent: f64,
}

/// Percentage of pixels where any RGB channel moved by more than `threshold`.
/// Frames of different sizes count as fully changed.
pub fn changed_pixel_percent(before: &Screenshot, after: &Screenshot, threshold: u8) -> f64 {
    if before.resolution() != after.resolution() {
        return 100.0;
    }
    let total = before.image.pixels().len();
    if total == 0 {
        return 0.0;
    }
    let changed = before
        .image
        .pixels()
        .zip(after.image.pixels())
        .filter(|(a, b)| (0..3).any(|c| a.0[c].abs_diff(b.0[c]) > threshold))
        .count();
    changed as f64 * 100.0 / total as f64
}

pub struct ActionVerifier {
    fusion: Arc<FusionEngine>,
    locator: Arc<ElementLocator>,
    config: VerifierConfig,
}

impl ActionVerifier {
    pub fn new(fusion: Arc<FusionEngine>, locator: Arc<ElementLocator>, config: VerifierConfig) -> Self {
        Self {
            fusion,
            locator,
            config,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    #[instrument(level = "debug", skip(self, before, after))]
    pub async fn verify_click_success(
        &self,
        before: &Screenshot,
        after: &Screenshot,
        expected: ExpectedChange,
    ) -> Result<VerificationResult, AutomationError> {
        let pct = changed_pixel_percent(before, after, self.config.pixel_threshold);
        debug!("{:.2}% of pixels changed", pct);

        if pct < self.config.min_change_percent {
            return Ok(VerificationResult::failure(
                format!("No significant screen change detected ({pct:.1}%)"),
                0.1,
            ));
        }

        if expected == ExpectedChange::Dialog {
            let elements_before = self.fusion.fuse_screen(before).await?;
            let elements_after = self.fusion.fuse_screen(after).await?;
            let new_elements = elements_after.len() as i64 - elements_before.len() as i64;
            if new_elements > 0 {
                return Ok(VerificationResult::success(
                    format!("Dialog appeared - {new_elements} new UI elements detected"),
                    0.8,
                )
                .with_elements(elements_after));
            }
        }

        Ok(VerificationResult::success(
            format!("Screen changed ({pct:.1}% of pixels)"),
            (pct / 10.0).min(1.0),
        ))
    }

    /// Re-read `region` and compare with `expected` after case folding.
    #[instrument(level = "debug", skip(self, screenshot, expected))]
    pub async fn verify_text_input(
        &self,
        screenshot: &Screenshot,
        region: BBox,
        expected: &str,
    ) -> Result<VerificationResult, AutomationError> {
        let expected_clean = normalize(expected);
        if expected_clean.is_empty() {
            return Ok(VerificationResult::failure("No expected text given", 0.1));
        }

        let regions = self
            .fusion
            .recognizer()
            .read_text(screenshot, Some(region))
            .await?;
        let detected = regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let detected_clean = normalize(&detected);

        if detected_clean.is_empty() {
            return Ok(VerificationResult::failure("No text detected in input field", 0.1));
        }

        if detected_clean.contains(&expected_clean) || expected_clean.contains(&detected_clean) {
            let confidence = if detected_clean == expected_clean { 0.9 } else { 0.7 };
            return Ok(VerificationResult::success(
                format!("Text verified in field {region} ({} characters)", expected.chars().count()),
                confidence,
            ));
        }

        Ok(VerificationResult::failure(
            format!("Text mismatch in field {region}"),
            0.2,
        ))
    }

    /// One locator pass for `description` on `screenshot`.
    pub async fn verify_element_present(
        &self,
        screenshot: &Screenshot,
        description: &str,
    ) -> Result<VerificationResult, AutomationError> {
        match self.locator.locate_in(screenshot, description).await? {
            Some((element, strategy)) => Ok(VerificationResult::success(
                format!("Element found by {strategy}: {description}"),
                element.confidence,
            )
            .with_elements(vec![element])),
            None => Ok(VerificationResult::failure(
                format!("Element not found: {description}"),
                0.1,
            )),
        }
    }

    /// At least half of `indicators` must resolve. Confidence is the mean confidence of
    /// the found ones times the found fraction.
    pub async fn verify_page_loaded(
        &self,
        screenshot: &Screenshot,
        indicators: &[String],
    ) -> Result<VerificationResult, AutomationError> {
        if indicators.is_empty() {
            return Err(AutomationError::Configuration(
                "no page-load indicators configured".to_string(),
            ));
        }

        let mut found = Vec::new();
        let mut elements = Vec::new();
        let mut total_confidence = 0.0;
        for indicator in indicators {
            if let Some((element, _)) = self.locator.locate_in(screenshot, indicator).await? {
                found.push(indicator.as_str());
                total_confidence += element.confidence;
                elements.push(element);
            }
        }

        if found.is_empty() {
            return Ok(VerificationResult::failure(
                format!("Page load verification failed - none of {indicators:?} found"),
                0.1,
            ));
        }

        let rate = found.len() as f64 / indicators.len() as f64;
        let average = total_confidence / found.len() as f64;
        let message = format!(
            "Found {}/{} indicators: {:?}",
            found.len(),
            indicators.len(),
            found
        );
        let result = if rate >= 0.5 {
            VerificationResult::success(message, average * rate)
        } else {
            VerificationResult::failure(message, average * rate)
        };
        Ok(result.with_elements(elements))
    }

    /// Poll capture + `verify_element_present` until found or attempts run out.
    pub async fn wait_for_element(
        &self,
        session: &Session,
        description: &str,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<VerificationResult, AutomationError> {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match session.capture(&format!("Waiting for '{description}'")).await {
                Ok(shot) => {
                    let mut result = self.verify_element_present(&shot, description).await?;
                    if result.success {
                        result.message.push_str(&format!(" (found after {attempt} attempts)"));
                        info!("{}", result.message);
                        return Ok(result);
                    }
                }
                Err(e) if e.is_retryable() => debug!("Capture failed while waiting: {}", e),
                Err(e) => return Err(e),
            }
            if attempt < max_attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(VerificationResult::failure(
            format!("Element '{description}' not found after {max_attempts} attempts"),
            0.1,
        ))
    }

    /// `wait_for_element` with the configured attempts and delay.
    pub async fn wait_for_element_default(
        &self,
        session: &Session,
        description: &str,
    ) -> Result<VerificationResult, AutomationError> {
        self.wait_for_element(
            session,
            description,
            self.config.wait_attempts,
            Duration::from_millis(self.config.wait_delay_ms),
        )
        .await
    }

    pub fn compare_screenshots(&self, a: &Screenshot, b: &Screenshot) -> ScreenComparison {
        compare_screenshots(a, b, self.config.pixel_threshold)
    }
}

/// Similarity from mean squared error over RGB channels.
pub fn compare_screenshots(a: &Screenshot, b: &Screenshot, pixel_threshold: u8) -> ScreenComparison {
    if a.resolution() != b.resolution() {
        return ScreenComparison {
            similarity: 0.0,
            mse: f64::from(u8::MAX).powi(2),
            change_percent: 100.0,
        };
    }
    let mut sum = 0.0;
    let mut samples = 0usize;
    for (p, q) in a.image.pixels().zip(b.image.pixels()) {
        for c in 0..3 {
            let d = f64::from(p.0[c]) - f64::from(q.0[c]);
            sum += d * d;
            samples += 1;
        }
    }
    let mse = if samples == 0 { 0.0 } else { sum / samples as f64 };
    ScreenComparison {
        similarity: 1.0 - mse / (255.0 * 255.0),
        mse,
        change_percent: changed_pixel_percent(a, b, pixel_threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{ObjectDetector, TextRecognizer};
    use crate::fusion::FusionConfig;
    use crate::locator::LocatorConfig;
    use crate::types::{DetectedObject, TextRegion};
    use async_trait::async_trait;
    use image::Rgba;

    /// Detects one "button" per bright 10x10 block in the top-left corner.
    struct BlockDetector;
    struct FieldText(Vec<TextRegion>);

    #[async_trait]
    impl ObjectDetector for BlockDetector {
        async fn detect(&self, s: &Screenshot) -> Result<Vec<DetectedObject>, AutomationError> {
            let mut out = Vec::new();
            if s.image.get_pixel(0, 0).0[0] > 200 {
                out.push(DetectedObject::new(BBox::new(0, 0, 10, 10), "button", 0.9));
                out.push(DetectedObject::new(BBox::new(200, 0, 210, 10), "button", 0.9));
            }
            Ok(out)
        }
    }

    #[async_trait]
    impl TextRecognizer for FieldText {
        async fn read_text(&self, _s: &Screenshot, region: Option<BBox>) -> Result<Vec<TextRegion>, AutomationError> {
            Ok(match region {
                Some(r) => crate::detection::filter_to_region(self.0.clone(), &r),
                None => self.0.clone(),
            })
        }
    }

    fn verifier(texts: Vec<TextRegion>) -> ActionVerifier {
        let fusion = Arc::new(FusionEngine::new(
            Arc::new(BlockDetector),
            Arc::new(FieldText(texts)),
            FusionConfig::default(),
        ));
        let locator = Arc::new(ElementLocator::new(fusion.clone(), LocatorConfig::default()));
        ActionVerifier::new(fusion, locator, VerifierConfig::default())
    }

    /// 100x100 black frame with the first `n` pixels painted white.
    fn frame_with_changes(n: u32) -> Screenshot {
        let mut shot = Screenshot::filled(100, 100, [0, 0, 0, 255]);
        for i in 0..n {
            shot.image.put_pixel(i % 100, i / 100, Rgba([255, 255, 255, 255]));
        }
        shot
    }

    #[tokio::test]
    async fn test_small_change_is_failure_for_every_kind() {
        let v = verifier(vec![]);
        let before = frame_with_changes(0);
        let after = frame_with_changes(99); // 0.99%
        for kind in [ExpectedChange::Any, ExpectedChange::Dialog, ExpectedChange::PageChange] {
            let r = v.verify_click_success(&before, &after, kind).await.unwrap();
            assert!(!r.success);
            assert!((r.confidence - 0.1).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_confidence_grows_with_change_and_caps() {
        let v = verifier(vec![]);
        let before = frame_with_changes(0);
        let mut last = 0.0;
        for n in [100, 500, 900, 5000] {
            let r = v
                .verify_click_success(&before, &frame_with_changes(n), ExpectedChange::Any)
                .await
                .unwrap();
            assert!(r.success);
            assert!(r.confidence >= last);
            last = r.confidence;
        }
        assert!((last - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dialog_needs_new_elements_for_high_confidence() {
        let v = verifier(vec![]);
        let before = frame_with_changes(0);
        // 2% change, and the white corner pixel makes the detector report two buttons
        let after = frame_with_changes(200);
        let r = v
            .verify_click_success(&before, &after, ExpectedChange::Dialog)
            .await
            .unwrap();
        assert!(r.success);
        assert!((r.confidence - 0.8).abs() < 1e-9);
        assert_eq!(r.found_elements.len(), 2);
    }

    #[tokio::test]
    async fn test_text_input_scores() {
        let field = BBox::new(0, 0, 200, 40);
        let v = verifier(vec![
            TextRegion::from_rect(BBox::new(5, 5, 80, 30), "John Doe", 0.9),
            TextRegion::from_rect(BBox::new(5, 300, 80, 330), "elsewhere", 0.9),
            TextRegion::from_rect(BBox::new(5, 205, 60, 230), "John", 0.9),
        ]);
        let shot = Screenshot::filled(400, 400, [255, 255, 255, 255]);

        let exact = v.verify_text_input(&shot, field, "john doe").await.unwrap();
        assert!(exact.success);
        assert!((exact.confidence - 0.9).abs() < 1e-9);

        let partial = v.verify_text_input(&shot, field, "John").await.unwrap();
        assert!((partial.confidence - 0.7).abs() < 1e-9);

        // field shows less than was typed
        let truncated = v
            .verify_text_input(&shot, BBox::new(0, 200, 200, 240), "John Doe")
            .await
            .unwrap();
        assert!(truncated.success);
        assert!((truncated.confidence - 0.7).abs() < 1e-9);

        let wrong = v.verify_text_input(&shot, field, "Jane Roe").await.unwrap();
        assert!(!wrong.success);
        assert!((wrong.confidence - 0.2).abs() < 1e-9);

        let empty = v
            .verify_text_input(&shot, BBox::new(300, 100, 390, 150), "John")
            .await
            .unwrap();
        assert!(!empty.success);
        assert!((empty.confidence - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_page_loaded_needs_half() {
        let v = verifier(vec![
            TextRegion::from_rect(BBox::new(0, 500, 60, 520), "Start", 0.8),
            TextRegion::from_rect(BBox::new(300, 500, 360, 520), "Taskbar", 0.6),
        ]);
        let shot = Screenshot::filled(800, 600, [0, 0, 0, 255]);
        let indicators: Vec<String> = vec!["Desktop".into(), "Start".into(), "Taskbar".into()];
        let r = v.verify_page_loaded(&shot, &indicators).await.unwrap();
        assert!(r.success);
        // mean 0.7 times 2/3
        assert!((r.confidence - 0.7 * 2.0 / 3.0).abs() < 1e-9);

        let r = v
            .verify_page_loaded(&shot, &["Desktop".to_string(), "Recycle".to_string(), "Start".to_string()])
            .await
            .unwrap();
        assert!(!r.success);
    }

    #[test]
    fn test_compare_screenshots() {
        let a = Screenshot::filled(10, 10, [0, 0, 0, 255]);
        let same = compare_screenshots(&a, &a.clone(), 10);
        assert!((same.similarity - 1.0).abs() < 1e-9);
        assert_eq!(same.change_percent, 0.0);

        let white = Screenshot::filled(10, 10, [255, 255, 255, 255]);
        let opposite = compare_screenshots(&a, &white, 10);
        assert!(opposite.similarity.abs() < 1e-9);
        assert_eq!(opposite.change_percent, 100.0);

        let other_size = compare_screenshots(&a, &Screenshot::filled(5, 5, [0, 0, 0, 255]), 10);
        assert_eq!(other_size.similarity, 0.0);
        assert_eq!(other_size.change_percent, 100.0);
    }
}
