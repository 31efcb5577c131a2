//! Typed tool surface for external callers.
//!
//! Each call carries its own images (base64 PNG) and parameters and returns a
//! JSON-serializable [`ToolResponse`]. Actions that touch the desktop need a session.

use crate::automation::Toolkit;
use crate::fusion::ScreenAnalysis;
use crate::locator::LocateStrategy;
use crate::screenshot::Screenshot;
use crate::session::Session;
use crate::types::{BBox, ExpectedChange, SafetyCheckResult, UIElement, VerificationResult};
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    AnalyzeScreen {
        image: String,
    },
    FindElement {
        image: String,
        description: String,
    },
    ClickElement {
        description: String,
        #[serde(default)]
        expected_change: ExpectedChange,
    },
    TypeText {
        text: String,
        #[serde(default)]
        field: Option<String>,
    },
    VerifyAction {
        before: String,
        after: String,
        #[serde(default)]
        expected_change: ExpectedChange,
    },
    VerifyText {
        image: String,
        region: BBox,
        expected: String,
    },
    VerifyIdentity {
        image: String,
        identifiers: Vec<(String, String)>,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::AnalyzeScreen { .. } => "analyze_screen",
            ToolCall::FindElement { .. } => "find_element",
            ToolCall::ClickElement { .. } => "click_element",
            ToolCall::TypeText { .. } => "type_text",
            ToolCall::VerifyAction { .. } => "verify_action",
            ToolCall::VerifyText { .. } => "verify_text",
            ToolCall::VerifyIdentity { .. } => "verify_identity",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FoundElement {
    pub element: UIElement,
    pub strategy: LocateStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub action: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<UIElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

/// Typed payload of a successful call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Analysis(ScreenAnalysis),
    Element(FoundElement),
    Action(ActionReport),
    Verification(VerificationResult),
    Identity(SafetyCheckResult),
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Success {
        success: bool,
        result: ToolOutput,
    },
    Failure {
        success: bool,
        error: String,
        error_kind: String,
        #[serde(skip_serializing_if = "is_false")]
        safety_critical: bool,
    },
}

impl ToolResponse {
    pub fn ok(result: ToolOutput) -> Self {
        ToolResponse::Success {
            success: true,
            result,
        }
    }

    pub fn failed(err: &AutomationError) -> Self {
        ToolResponse::Failure {
            success: false,
            error: err.to_string(),
            error_kind: err.kind().to_string(),
            safety_critical: err.is_safety_critical(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResponse::Success { .. })
    }
}

/// Executes tool calls against a toolkit and, for desktop actions, a session.
pub struct ToolRunner<'a> {
    toolkit: &'a Toolkit,
    session: Option<&'a Session>,
}

impl<'a> ToolRunner<'a> {
    pub fn new(toolkit: &'a Toolkit) -> Self {
        Self {
            toolkit,
            session: None,
        }
    }

    pub fn with_session(mut self, session: &'a Session) -> Self {
        self.session = Some(session);
        self
    }

    pub async fn execute(&self, call: ToolCall) -> ToolResponse {
        let name = call.name();
        debug!("Executing tool {}", name);
        match self.dispatch(call).await {
            Ok(output) => ToolResponse::ok(output),
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                if let Some(session) = self.session {
                    session.log_error(format!("Tool {name} failed: {e}"));
                }
                ToolResponse::failed(&e)
            }
        }
    }

    fn session(&self, tool: &str) -> Result<&'a Session, AutomationError> {
        self.session.ok_or_else(|| {
            AutomationError::Configuration(format!("{tool} requires an active session"))
        })
    }

    async fn dispatch(&self, call: ToolCall) -> Result<ToolOutput, AutomationError> {
        let tk = self.toolkit;
        match call {
            ToolCall::AnalyzeScreen { image } => {
                let shot = Screenshot::from_base64(&image)?;
                Ok(ToolOutput::Analysis(tk.fusion.analyze(&shot).await?))
            }
            ToolCall::FindElement { image, description } => {
                let shot = Screenshot::from_base64(&image)?;
                match tk.locator.locate_in(&shot, &description).await? {
                    Some((element, strategy)) => {
                        Ok(ToolOutput::Element(FoundElement { element, strategy }))
                    }
                    None => Err(AutomationError::ElementNotFound {
                        description,
                        attempts: 1,
                    }),
                }
            }
            ToolCall::ClickElement {
                description,
                expected_change,
            } => {
                let session = self.session("click_element")?;
                let found = tk.locator.locate_default(session, &description).await?;
                let trace = tk.executor.click(session, &found.element).await?;
                let verification = tk
                    .verifier
                    .verify_click_success(&trace.before, &trace.after, expected_change)
                    .await?;
                Ok(ToolOutput::Action(ActionReport {
                    action: trace.action,
                    message: trace.message,
                    element: Some(found.element),
                    verification: Some(verification),
                }))
            }
            ToolCall::TypeText { text, field } => {
                let session = self.session("type_text")?;
                let target = match field {
                    Some(label) => Some(tk.locator.locate_default(session, &label).await?.element),
                    None => None,
                };
                let trace = tk
                    .executor
                    .type_text(session, &text, target.as_ref())
                    .await?;
                Ok(ToolOutput::Action(ActionReport {
                    action: trace.action,
                    message: trace.message,
                    element: target,
                    verification: None,
                }))
            }
            ToolCall::VerifyAction {
                before,
                after,
                expected_change,
            } => {
                let before = Screenshot::from_base64(&before)?;
                let after = Screenshot::from_base64(&after)?;
                Ok(ToolOutput::Verification(
                    tk.verifier
                        .verify_click_success(&before, &after, expected_change)
                        .await?,
                ))
            }
            ToolCall::VerifyText {
                image,
                region,
                expected,
            } => {
                let shot = Screenshot::from_base64(&image)?;
                Ok(ToolOutput::Verification(
                    tk.verifier.verify_text_input(&shot, region, &expected).await?,
                ))
            }
            ToolCall::VerifyIdentity { image, identifiers } => {
                let shot = Screenshot::from_base64(&image)?;
                let result = tk.safety.verify_identity(&shot, &identifiers).await?;
                if result.success {
                    Ok(ToolOutput::Identity(result))
                } else {
                    Err(AutomationError::SafetyCritical(result.message))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationConfig;
    use crate::detection::{ObjectDetector, TextRecognizer};
    use crate::types::{DetectedObject, TextRegion};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct OneButton;
    struct SubmitText;

    #[async_trait]
    impl ObjectDetector for OneButton {
        async fn detect(&self, _s: &Screenshot) -> Result<Vec<DetectedObject>, AutomationError> {
            Ok(vec![DetectedObject::new(BBox::new(400, 300, 500, 350), "button", 0.8)])
        }
    }

    #[async_trait]
    impl TextRecognizer for SubmitText {
        async fn read_text(&self, _s: &Screenshot, _r: Option<BBox>) -> Result<Vec<TextRegion>, AutomationError> {
            Ok(vec![TextRegion::from_rect(BBox::new(420, 320, 460, 340), "Submit", 0.9)])
        }
    }

    fn toolkit() -> Toolkit {
        Toolkit::new(Arc::new(OneButton), Arc::new(SubmitText), &AutomationConfig::default())
    }

    fn image() -> String {
        Screenshot::filled(800, 600, [30, 30, 30, 255])
            .to_base64_png()
            .unwrap()
    }

    #[test]
    fn test_call_wire_format() {
        let call: ToolCall = serde_json::from_str(
            r#"{"tool": "click_element", "description": "Submit", "expected_change": "dialog"}"#,
        )
        .unwrap();
        assert_eq!(
            call,
            ToolCall::ClickElement {
                description: "Submit".into(),
                expected_change: ExpectedChange::Dialog
            }
        );
        assert_eq!(call.name(), "click_element");
    }

    #[tokio::test]
    async fn test_find_element_response() {
        let tk = toolkit();
        let runner = ToolRunner::new(&tk);
        let response = runner
            .execute(ToolCall::FindElement {
                image: image(),
                description: "submit".into(),
            })
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["result"]["strategy"], "text_match");
        assert_eq!(json["result"]["element"]["kind"], "combined");
    }

    #[tokio::test]
    async fn test_missing_session_and_bad_image() {
        let tk = toolkit();
        let runner = ToolRunner::new(&tk);
        let response = runner
            .execute(ToolCall::TypeText {
                text: "hello".into(),
                field: None,
            })
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "configuration_error");
        assert!(json.get("safety_critical").is_none());

        let response = runner
            .execute(ToolCall::AnalyzeScreen {
                image: "not an image".into(),
            })
            .await;
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_identity_failure_is_flagged() {
        let tk = toolkit();
        let runner = ToolRunner::new(&tk);
        let response = runner
            .execute(ToolCall::VerifyIdentity {
                image: image(),
                identifiers: vec![("name".into(), "Jane Roe".into()), ("mrn".into(), "999".into())],
            })
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["safety_critical"], true);
    }

    struct IdleDesktop;

    #[async_trait]
    impl crate::connection::Connection for IdleDesktop {
        async fn connect(&self, _t: &crate::connection::ConnectionTarget) -> Result<crate::connection::ConnectionResult, AutomationError> {
            Ok(crate::connection::ConnectionResult::ok("ok"))
        }
        async fn disconnect(&self) -> Result<crate::connection::ConnectionResult, AutomationError> {
            Ok(crate::connection::ConnectionResult::ok("bye"))
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn capture_screen(&self) -> Result<Screenshot, AutomationError> {
            Ok(Screenshot::filled(800, 600, [30, 30, 30, 255]))
        }
        async fn click(&self, _x: i32, _y: i32, _b: crate::types::MouseButton) -> Result<crate::connection::ActionResult, AutomationError> {
            Ok(crate::connection::ActionResult::ok("clicked"))
        }
        async fn type_text(&self, _t: &str) -> Result<crate::connection::ActionResult, AutomationError> {
            Ok(crate::connection::ActionResult::ok("typed"))
        }
        async fn key_press(&self, _k: &str) -> Result<crate::connection::ActionResult, AutomationError> {
            Ok(crate::connection::ActionResult::ok("pressed"))
        }
    }

    #[tokio::test]
    async fn test_failed_tool_is_logged_once() {
        let tk = toolkit();
        let session = Session::with_id("t", Box::new(IdleDesktop), Default::default());
        let runner = ToolRunner::new(&tk).with_session(&session);
        let response = runner
            .execute(ToolCall::VerifyIdentity {
                image: image(),
                identifiers: vec![("name".into(), "Jane Roe".into()), ("mrn".into(), "999".into())],
            })
            .await;
        assert!(!response.is_success());
        let errors = session.error_log();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Tool verify_identity failed"));
    }
}
