//! Controller phase: locate controls inside the verified application and act on them.

use crate::automation::Toolkit;
use crate::config::{AutomationConfig, FormField};
use crate::errors::{Phase, PhaseError};
use crate::locator::LocatedElement;
use crate::session::{Session, SessionPhase};
use crate::types::{ExpectedChange, VerificationResult};
use crate::AutomationError;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument};

/// Result of the button-click workflow.
#[derive(Debug, Clone, Serialize)]
pub struct ClickOutcome {
    pub target: String,
    pub element: LocatedElement,
    pub click_verification: VerificationResult,
    pub outcome_verification: VerificationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerOutcome {
    pub fields_filled: Vec<String>,
    pub click: Option<ClickOutcome>,
}

pub struct Controller<'a> {
    session: &'a Session,
    config: &'a AutomationConfig,
    toolkit: &'a Toolkit,
}

impl<'a> Controller<'a> {
    pub fn new(session: &'a Session, config: &'a AutomationConfig, toolkit: &'a Toolkit) -> Self {
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
        self.session.log_action(format!("Controller: {name}"));
        let result = fut.await.map_err(|e| {
            self.session
                .log_error(format!("Controller failed at '{name}': {e}"));
            self.session.fail();
            PhaseError::new(Phase::Controller, name, e)
        });
        let delay = self.config.timeouts.step_delay_ms;
        if result.is_ok() && delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        result
    }

    /// The navigator must have finished and left an application running.
    pub fn ensure_ready(&self) -> Result<(), PhaseError> {
        let check = "check prerequisites";
        let err = if !self.session.navigator_done() {
            Some("navigator phase has not completed")
        } else if self.session.current_app().is_none() {
            Some("no application is currently running")
        } else {
            None
        };
        match err {
            Some(msg) => {
                let e = self
                    .session
                    .record_error("Controller", AutomationError::Internal(msg.to_string()));
                Err(PhaseError::new(Phase::Controller, check, e))
            }
            None => Ok(()),
        }
    }

    /// Fill configured form fields, then click the submit or target button.
    #[instrument(skip(self), fields(session = %self.session.id()))]
    pub async fn run(&self) -> Result<ControllerOutcome, PhaseError> {
        self.ensure_ready()?;
        self.session
            .transition(SessionPhase::ControllingApp)
            .map_err(|e| PhaseError::new(Phase::Controller, "check prerequisites", e))?;
        info!("Controller phase starting");

        let target = &self.config.target;
        let expected = &target.expected_outcomes;
        let outcome = if target.form_fields.is_empty() {
            let click = self.click_workflow(&target.button_text, expected).await?;
            ControllerOutcome {
                fields_filled: Vec::new(),
                click: Some(click),
            }
        } else {
            self.fill_form(&target.form_fields, target.submit_button.as_deref(), expected)
                .await?
        };

        self.session.log_action("Controller phase completed");
        Ok(outcome)
    }

    /// Find (with scroll fallback), click, verify the click, verify the outcome.
    pub async fn click_workflow(
        &self,
        target: &str,
        expected_outcomes: &[String],
    ) -> Result<ClickOutcome, PhaseError> {
        self.ensure_ready()?;
        let tk = self.toolkit;

        self.step("capture current screen", self.session.capture("App interaction start"))
            .await?;

        let located = self
            .step(
                "find target element",
                tk.locator.find_with_fallback(self.session, &tk.executor, target),
            )
            .await?;

        let click_verification = self
            .step("click element", async {
                let trace = tk.executor.click(self.session, &located.element).await?;
                tk.verifier
                    .verify_click_success(&trace.before, &trace.after, ExpectedChange::Any)
                    .await?
                    .into_result()
            })
            .await?;

        let outcome_verification = self
            .step("verify action outcome", self.verify_outcomes(expected_outcomes))
            .await?;

        Ok(ClickOutcome {
            target: target.to_string(),
            element: located,
            click_verification,
            outcome_verification,
        })
    }

    /// At least one expected outcome must be present. No outcomes means nothing to check.
    async fn verify_outcomes(&self, expected: &[String]) -> Result<VerificationResult, AutomationError> {
        if expected.is_empty() {
            return Ok(VerificationResult::success(
                "Outcome verification skipped (no expected outcomes)",
                1.0,
            ));
        }
        let shot = self.session.capture("Action outcome").await?;
        for outcome in expected {
            let result = self
                .toolkit
                .verifier
                .verify_element_present(&shot, outcome)
                .await?;
            if result.success {
                self.session
                    .log_action(format!("Expected outcome found: {outcome}"));
                return Ok(result);
            }
        }
        Err(AutomationError::VerificationFailed(format!(
            "none of the expected outcomes {expected:?} appeared"
        )))
    }

    /// Type each value into the field found by its label, then submit when asked.
    pub async fn fill_form(
        &self,
        fields: &[FormField],
        submit: Option<&str>,
        expected_outcomes: &[String],
    ) -> Result<ControllerOutcome, PhaseError> {
        self.ensure_ready()?;
        let tk = self.toolkit;
        let mut filled = Vec::with_capacity(fields.len());

        for field in fields {
            let step = format!("fill field '{}'", field.label);
            self.step(&step, async {
                let located = tk
                    .locator
                    .find_with_fallback(self.session, &tk.executor, &field.label)
                    .await?;
                tk.executor
                    .type_text(self.session, &field.value, Some(&located.element))
                    .await?;
                Ok::<(), AutomationError>(())
            })
            .await?;
            filled.push(field.label.clone());
        }

        let click = match submit {
            Some(button) => Some(self.click_workflow(button, expected_outcomes).await?),
            None => None,
        };

        Ok(ControllerOutcome {
            fields_filled: filled,
            click,
        })
    }
}
