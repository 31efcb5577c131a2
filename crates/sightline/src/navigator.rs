//! Navigator phase: connect, wait for the desktop, launch and verify the target
//! application, then gate on patient identity.

use crate::automation::Toolkit;
use crate::config::AutomationConfig;
use crate::errors::{Phase, PhaseError};
use crate::retry::{Backoff, RetryPolicy};
use crate::screenshot::Screenshot;
use crate::session::{Session, SessionPhase};
use crate::types::{ExpectedChange, SafetyCheckResult, VerificationResult};
use crate::AutomationError;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// What the navigator hands to the controller phase.
pub struct NavigationOutcome {
    pub toolkit: Toolkit,
    pub app_name: String,
    pub safety: Option<SafetyCheckResult>,
}

pub struct Navigator<'a> {
    session: &'a Session,
    config: &'a AutomationConfig,
    toolkit: Toolkit,
}

impl<'a> Navigator<'a> {
    pub fn new(session: &'a Session, config: &'a AutomationConfig, toolkit: Toolkit) -> Self {
        Self {
            session,
            config,
            toolkit,
        }
    }

    async fn step<T, Fut>(&self, name: &str, fut: Fut) -> Result<T, PhaseError>
    where
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        self.session.log_action(format!("Navigator: {name}"));
        fut.await.map_err(|e| {
            self.session
                .log_error(format!("Navigator failed at '{name}': {e}"));
            self.session.fail();
            PhaseError::new(Phase::Navigator, name, e)
        })
    }

    fn advance(&self, step: &str, next: SessionPhase) -> Result<(), PhaseError> {
        self.session
            .transition(next)
            .map_err(|e| PhaseError::new(Phase::Navigator, step, e))
    }

    async fn pause(&self, ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Run every navigator step in order; the first failure aborts the phase.
    #[instrument(skip(self), fields(session = %self.session.id()))]
    pub async fn run(self) -> Result<NavigationOutcome, PhaseError> {
        info!("Navigator phase starting");
        self.advance("connect", SessionPhase::Connecting)?;
        self.step("connect", self.connect()).await?;
        self.advance("connect", SessionPhase::Ready)?;

        self.step("capture initial screen", self.capture_with_retry("Initial screen"))
            .await?;
        self.step("wait for desktop", self.wait_for_desktop()).await?;
        self.advance("wait for desktop", SessionPhase::NavigatingApp)?;

        let app_name = self.config.target.app_display_name().to_string();
        let app = self
            .step(
                "find application",
                self.toolkit.locator.locate_default(self.session, &app_name),
            )
            .await?;
        self.session.set_handoff(
            "app_location",
            json!({ "x": app.element.center.x, "y": app.element.center.y }),
        );

        self.step("launch application", self.launch(&app.element)).await?;
        self.step("verify application loaded", self.wait_for_app(&app_name))
            .await?;
        self.session.set_current_app(self.config.target.app_name.clone());
        self.advance("verify application loaded", SessionPhase::AppVerified)?;

        let safety = if self.config.identity.is_configured() {
            let identifiers = self.config.identity.identifiers();
            let result = self
                .step(
                    "verify identity",
                    self.toolkit.safety.enforce(self.session, &identifiers),
                )
                .await?;
            self.session.set_handoff("identity_verified", json!(true));
            self.session
                .set_handoff("verified_fields", json!(result.verified_fields));
            self.advance("verify identity", SessionPhase::SafetyChecked)?;
            Some(result)
        } else {
            debug!("No identity configured, skipping safety gate");
            None
        };

        self.session.mark_navigator_done();
        self.session
            .set_handoff("app_name", json!(self.config.target.app_name));
        self.session.set_handoff(
            "navigator_completed_at",
            json!(chrono::Local::now().to_rfc3339()),
        );
        self.session.log_action("Navigator phase completed");
        info!("Navigator phase completed");

        Ok(NavigationOutcome {
            toolkit: self.toolkit,
            app_name,
            safety,
        })
    }

    async fn connect(&self) -> Result<(), AutomationError> {
        let limit = Duration::from_secs(self.config.timeouts.connection_secs);
        match tokio::time::timeout(limit, self.session.connect()).await {
            Ok(result) => result,
            Err(_) => Err(AutomationError::Timeout(format!(
                "connecting to {} took longer than {:?}",
                self.session.target().address(),
                limit
            ))),
        }
    }

    async fn capture_with_retry(&self, note: &str) -> Result<Screenshot, AutomationError> {
        let executor = self.toolkit.executor.config();
        RetryPolicy::new(
            executor.capture_retries,
            Backoff::fixed(Duration::from_millis(executor.retry_delay_ms)),
        )
        .run("capture", |_| self.session.capture(note))
        .await
    }

    /// Poll the ready indicators until they resolve or the desktop timeout passes.
    async fn wait_for_desktop(&self) -> Result<VerificationResult, AutomationError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.timeouts.desktop_load_secs);
        let indicators = &self.config.target.desktop_indicators;
        let mut polls = 0u32;
        loop {
            polls += 1;
            let shot = self.capture_with_retry("Desktop readiness").await?;
            let result = self
                .toolkit
                .verifier
                .verify_page_loaded(&shot, indicators)
                .await?;
            if result.success {
                self.session
                    .log_action(format!("Desktop ready after {polls} poll(s): {}", result.message));
                return Ok(result);
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout(format!(
                    "desktop not ready after {} poll(s): {}",
                    polls, result.message
                )));
            }
            self.pause(self.config.timeouts.poll_interval_ms).await;
        }
    }

    async fn launch(&self, icon: &crate::types::UIElement) -> Result<VerificationResult, AutomationError> {
        let trace = self
            .toolkit
            .executor
            .double_click(self.session, icon)
            .await?;
        let result = self
            .toolkit
            .verifier
            .verify_click_success(&trace.before, &trace.after, ExpectedChange::PageChange)
            .await?
            .into_result()?;
        self.session.log_action(format!("Launch verified: {}", result.message));
        Ok(result)
    }

    /// Majority vote over the independent load checks, polled until the launch timeout.
    async fn wait_for_app(&self, app_name: &str) -> Result<(), AutomationError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.timeouts.app_launch_secs);
        loop {
            let shot = self.capture_with_retry("Application load").await?;
            let (passed, total) = self.app_load_checks(&shot, app_name).await?;
            if passed * 2 > total {
                self.session.log_action(format!(
                    "Application '{app_name}' loaded ({passed}/{total} checks passed)"
                ));
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::VerificationFailed(format!(
                    "application '{app_name}' did not load: {passed}/{total} checks passed"
                )));
            }
            self.pause(self.config.timeouts.poll_interval_ms).await;
        }
    }

    async fn app_load_checks(&self, shot: &Screenshot, app_name: &str) -> Result<(usize, usize), AutomationError> {
        let verifier = &self.toolkit.verifier;
        let mut checks = Vec::with_capacity(3);

        let indicators = &self.config.target.app_indicators;
        if !indicators.is_empty() {
            checks.push(verifier.verify_page_loaded(shot, indicators).await?.success);
        }
        checks.push(!self.toolkit.fusion.fuse_screen(shot).await?.is_empty());
        checks.push(verifier.verify_element_present(shot, app_name).await?.success);

        let passed = checks.iter().filter(|ok| **ok).count();
        debug!("Application load checks: {:?}", checks);
        Ok((passed, checks.len()))
    }
}
