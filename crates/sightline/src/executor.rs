//! Input actions bracketed by before/after captures.

use crate::connection::ActionResult;
use crate::retry::{Backoff, RetryPolicy};
use crate::screenshot::Screenshot;
use crate::session::Session;
use crate::types::{MouseButton, Point, ScrollDirection, UIElement};
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pause between an action and the after-capture
    pub settle_delay_ms: u64,
    pub action_retries: u32,
    pub capture_retries: u32,
    pub retry_delay_ms: u64,
    pub double_click_interval_ms: u64,
    /// Write typed text into the action log. Off by default since it may carry identity data.
    pub log_phi: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            action_retries: 3,
            capture_retries: 3,
            retry_delay_ms: 1000,
            double_click_interval_ms: 100,
            log_phi: false,
        }
    }
}

/// Evidence of one executed action.
#[derive(Debug, Clone)]
pub struct ActionTrace {
    pub action: String,
    pub message: String,
    pub before: Screenshot,
    pub after: Screenshot,
}

pub struct ActionExecutor {
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn policy(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            Backoff::fixed(Duration::from_millis(self.config.retry_delay_ms)),
        )
    }

    async fn capture(&self, session: &Session, note: &str) -> Result<Screenshot, AutomationError> {
        self.policy(self.config.capture_retries)
            .run("capture", |_| session.capture(note))
            .await
    }

    async fn settle(&self) {
        if self.config.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        }
    }

    /// Capture, run `op` with action retries, settle, capture again, log.
    async fn perform<F, Fut>(
        &self,
        session: &Session,
        action: &str,
        op: F,
    ) -> Result<ActionTrace, AutomationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<ActionResult, AutomationError>>,
    {
        let before = self
            .capture(session, &format!("Before {action}"))
            .await?;

        let mut op = op;
        let message = self
            .policy(self.config.action_retries)
            .run(action, |attempt| {
                let fut = op(attempt);
                async move { fut.await?.into_result() }
            })
            .await?;

        self.settle().await;

        let after = self
            .capture(session, &format!("After {action}"))
            .await?;

        session.log_action(action);
        debug!("{} -> {}", action, message);
        Ok(ActionTrace {
            action: action.to_string(),
            message,
            before,
            after,
        })
    }

    pub async fn click_at(
        &self,
        session: &Session,
        point: Point,
        button: MouseButton,
        label: &str,
    ) -> Result<ActionTrace, AutomationError> {
        let conn = session.connection();
        let action = format!("Clicked {label} at {point}");
        self.perform(session, &action, |_| conn.click(point.x, point.y, button))
            .await
    }

    #[instrument(skip_all, fields(element = %element.description))]
    pub async fn click(&self, session: &Session, element: &UIElement) -> Result<ActionTrace, AutomationError> {
        self.click_at(session, element.center, MouseButton::Left, &element.description)
            .await
    }

    /// Two left clicks separated by the configured interval.
    #[instrument(skip_all, fields(element = %element.description))]
    pub async fn double_click(
        &self,
        session: &Session,
        element: &UIElement,
    ) -> Result<ActionTrace, AutomationError> {
        let conn = session.connection();
        let point = element.center;
        let interval = Duration::from_millis(self.config.double_click_interval_ms);
        let action = format!("Double-clicked {} at {}", element.description, point);
        self.perform(session, &action, |_| async move {
            let first = conn.click(point.x, point.y, MouseButton::Left).await?;
            if !first.success {
                return Ok(first);
            }
            tokio::time::sleep(interval).await;
            conn.click(point.x, point.y, MouseButton::Left).await
        })
        .await
    }

    /// Type `text`, clicking `focus` first when given.
    #[instrument(skip_all)]
    pub async fn type_text(
        &self,
        session: &Session,
        text: &str,
        focus: Option<&UIElement>,
    ) -> Result<ActionTrace, AutomationError> {
        let conn = session.connection();
        let shown = if self.config.log_phi {
            format!("'{text}'")
        } else {
            format!("{} characters", text.chars().count())
        };
        let action = match focus {
            Some(el) => format!("Typed {shown} into {}", el.description),
            None => format!("Typed {shown}"),
        };
        let focus_point = focus.map(|el| el.center);
        self.perform(session, &action, |_| async move {
            if let Some(p) = focus_point {
                let clicked = conn.click(p.x, p.y, MouseButton::Left).await?;
                if !clicked.success {
                    return Ok(clicked);
                }
            }
            conn.type_text(text).await
        })
        .await
    }

    /// Scroll around the center of the current frame.
    #[instrument(skip(self, session))]
    pub async fn scroll(
        &self,
        session: &Session,
        direction: ScrollDirection,
        pixels: u32,
    ) -> Result<ActionTrace, AutomationError> {
        let conn = session.connection();
        let center = match session.latest_screenshot() {
            Some(shot) => shot.bounds().center(),
            None => self.capture(session, "Scroll origin").await?.bounds().center(),
        };
        let action = format!("Scrolled {direction} {pixels}px at {center}");
        self.perform(session, &action, |_| conn.scroll(center.x, center.y, direction, pixels))
            .await
    }

    pub async fn key_press(&self, session: &Session, key: &str) -> Result<ActionTrace, AutomationError> {
        let conn = session.connection();
        let action = format!("Pressed key '{key}'");
        self.perform(session, &action, |_| conn.key_press(key)).await
    }
}
