//! Identity check that gates every action on the target application.

use crate::detection::TextRecognizer;
use crate::retry::{Backoff, RetryPolicy};
use crate::screenshot::Screenshot;
use crate::session::Session;
use crate::types::{BBox, SafetyCheckResult};
use crate::utils::normalize;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Height of the banner region as a fraction of the frame, measured from the top
    pub banner_fraction: f64,
    /// Matches required when at least this many identifiers are configured
    pub min_verified: usize,
    /// Include identity values in log output
    pub log_phi: bool,
    /// Banner capture attempts before the check gives up
    pub capture_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            banner_fraction: 0.2,
            min_verified: 2,
            log_phi: false,
            capture_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

pub struct SafetyGate {
    recognizer: Arc<dyn TextRecognizer>,
    config: SafetyConfig,
}

impl SafetyGate {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, config: SafetyConfig) -> Self {
        Self { recognizer, config }
    }

    /// Top strip of the frame where identity banners live.
    pub fn banner_region(&self, screenshot: &Screenshot) -> BBox {
        let fraction = self.config.banner_fraction.clamp(0.0, 1.0);
        let height = (screenshot.height() as f64 * fraction).round() as i32;
        BBox::new(0, 0, screenshot.width() as i32, height)
    }

    /// Check `expected` `(field, value)` pairs against text read from the banner.
    ///
    /// Empty values are ignored. Success needs `min(min_verified, non-empty count)` matches.
    #[instrument(skip_all)]
    pub async fn verify_identity(
        &self,
        screenshot: &Screenshot,
        expected: &[(String, String)],
    ) -> Result<SafetyCheckResult, AutomationError> {
        let wanted: Vec<(&str, String)> = expected
            .iter()
            .map(|(field, value)| (field.as_str(), normalize(value)))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        if wanted.is_empty() {
            return Err(AutomationError::Configuration(
                "identity verification requested without any identifier values".to_string(),
            ));
        }
        let all_fields = || wanted.iter().map(|(f, _)| f.to_string()).collect::<Vec<_>>();

        let region = self.banner_region(screenshot);
        let banner_text: Vec<String> = self
            .recognizer
            .read_text(screenshot, Some(region))
            .await?
            .into_iter()
            .map(|r| r.text)
            .filter(|t| !t.trim().is_empty())
            .collect();

        if banner_text.is_empty() {
            return Ok(SafetyCheckResult {
                success: false,
                message: format!("No text found in identity banner {region}"),
                verified_fields: Vec::new(),
                missing_fields: all_fields(),
                banner_text,
                safety_critical: true,
            });
        }

        let haystack = normalize(&banner_text.join(" "));
        let (verified, missing): (Vec<_>, Vec<_>) = wanted
            .iter()
            .partition(|(_, value)| haystack.contains(value.as_str()));
        let verified_fields: Vec<String> = verified.iter().map(|(f, _)| f.to_string()).collect();
        let missing_fields: Vec<String> = missing.iter().map(|(f, _)| f.to_string()).collect();

        let required = self.config.min_verified.min(wanted.len());
        let success = verified_fields.len() >= required;
        let message = if success {
            format!(
                "Identity verified: {}/{} identifiers matched {:?}",
                verified_fields.len(),
                wanted.len(),
                verified_fields
            )
        } else {
            format!(
                "Identity mismatch: {}/{} identifiers matched, {} required; missing {:?}",
                verified_fields.len(),
                wanted.len(),
                required,
                missing_fields
            )
        };

        if self.config.log_phi {
            info!(banner = ?banner_text, "{}", message);
        } else {
            info!("{}", message);
        }

        Ok(SafetyCheckResult {
            success,
            message,
            verified_fields,
            missing_fields,
            banner_text,
            safety_critical: true,
        })
    }

    /// Capture, verify, and turn a failed check into `SafetyCritical`. Only the capture
    /// is retried; a mismatch is final.
    pub async fn enforce(
        &self,
        session: &Session,
        expected: &[(String, String)],
    ) -> Result<SafetyCheckResult, AutomationError> {
        let shot = RetryPolicy::new(
            self.config.capture_retries,
            Backoff::fixed(Duration::from_millis(self.config.retry_delay_ms)),
        )
        .run("identity capture", |_| session.capture("Identity verification"))
        .await?;
        let result = self.verify_identity(&shot, expected).await?;
        if result.success {
            session.log_action(format!("Safety check passed: {:?} verified", result.verified_fields));
            Ok(result)
        } else {
            error!("Safety check failed: {}", result.message);
            Err(AutomationError::SafetyCritical(result.message))
        }
    }
}
