//! Per-job mutable state: connection handle, screenshot history, logs and phase flags.

use crate::connection::{Connection, ConnectionTarget};
use crate::screenshot::Screenshot;
use crate::utils::timestamped;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Screenshots kept per session; the oldest is dropped on overflow.
pub const SCREENSHOT_HISTORY: usize = 10;

/// Lifecycle of one automation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    Connecting,
    Ready,
    NavigatingApp,
    AppVerified,
    SafetyChecked,
    ControllingApp,
    Completed,
    Failed,
}

impl SessionPhase {
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        if next == Failed {
            return !matches!(self, Completed | Failed);
        }
        matches!(
            (self, next),
            (Created, Connecting)
                | (Connecting, Ready)
                | (Ready, NavigatingApp)
                | (NavigatingApp, AppVerified)
                | (AppVerified, SafetyChecked)
                // no identity configured
                | (AppVerified, ControllingApp)
                | (SafetyChecked, ControllingApp)
                | (ControllingApp, Completed)
                // navigation-only runs
                | (AppVerified, Completed)
                | (SafetyChecked, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Created => "created",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Ready => "ready",
            SessionPhase::NavigatingApp => "navigating_app",
            SessionPhase::AppVerified => "app_verified",
            SessionPhase::SafetyChecked => "safety_checked",
            SessionPhase::ControllingApp => "controlling_app",
            SessionPhase::Completed => "completed",
            SessionPhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Counters exposed in the session report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub is_connected: bool,
    pub current_app: Option<String>,
    pub screenshots_count: usize,
    pub actions_count: usize,
    pub errors_count: usize,
    #[serde(rename = "agent1Completed")]
    pub navigator_completed: bool,
}

struct SessionState {
    phase: SessionPhase,
    is_connected: bool,
    current_app: Option<String>,
    screenshots: VecDeque<Screenshot>,
    action_log: Vec<String>,
    error_log: Vec<String>,
    navigator_done: bool,
    handoff: Map<String, Value>,
}

/// One automation job. Owns its connection for its whole lifetime.
pub struct Session {
    id: String,
    target: ConnectionTarget,
    connection: Box<dyn Connection>,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(connection: Box<dyn Connection>, target: ConnectionTarget) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_id(id, connection, target)
    }

    pub fn with_id(id: impl Into<String>, connection: Box<dyn Connection>, target: ConnectionTarget) -> Self {
        Self {
            id: id.into(),
            target,
            connection,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Created,
                is_connected: false,
                current_app: None,
                screenshots: VecDeque::with_capacity(SCREENSHOT_HISTORY),
                action_log: Vec::new(),
                error_log: Vec::new(),
                navigator_done: false,
                handoff: Map::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&self, next: SessionPhase) -> Result<(), AutomationError> {
        let mut state = self.state();
        if state.phase == next {
            return Ok(());
        }
        if !state.phase.can_transition_to(next) {
            return Err(AutomationError::Internal(format!(
                "invalid session transition {} -> {}",
                state.phase, next
            )));
        }
        debug!(session = %self.id, from = %state.phase, to = %next, "Session phase change");
        state.phase = next;
        Ok(())
    }

    /// Mark the session failed unless it already finished.
    pub fn fail(&self) {
        let mut state = self.state();
        if !state.phase.is_terminal() {
            state.phase = SessionPhase::Failed;
        }
    }

    pub fn log_action(&self, message: impl AsRef<str>) {
        let line = timestamped(message.as_ref());
        info!(session = %self.id, "{}", message.as_ref());
        self.state().action_log.push(line);
    }

    pub fn log_error(&self, message: impl AsRef<str>) {
        let line = timestamped(message.as_ref());
        warn!(session = %self.id, "{}", message.as_ref());
        self.state().error_log.push(line);
    }

    /// Append `err` to the error log and hand it back for propagation.
    pub fn record_error(&self, context: &str, err: AutomationError) -> AutomationError {
        self.log_error(format!("{context}: {err}"));
        err
    }

    pub fn push_screenshot(&self, screenshot: Screenshot) {
        let mut state = self.state();
        if state.screenshots.len() == SCREENSHOT_HISTORY {
            state.screenshots.pop_front();
        }
        state.screenshots.push_back(screenshot);
    }

    pub fn latest_screenshot(&self) -> Option<Screenshot> {
        self.state().screenshots.back().cloned()
    }

    /// Oldest first.
    pub fn screenshots(&self) -> Vec<Screenshot> {
        self.state().screenshots.iter().cloned().collect()
    }

    pub fn action_log(&self) -> Vec<String> {
        self.state().action_log.clone()
    }

    pub fn error_log(&self) -> Vec<String> {
        self.state().error_log.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().is_connected = connected;
    }

    pub fn current_app(&self) -> Option<String> {
        self.state().current_app.clone()
    }

    pub fn set_current_app(&self, app: impl Into<String>) {
        self.state().current_app = Some(app.into());
    }

    pub fn navigator_done(&self) -> bool {
        self.state().navigator_done
    }

    pub fn mark_navigator_done(&self) {
        self.state().navigator_done = true;
    }

    pub fn set_handoff(&self, key: impl Into<String>, value: Value) {
        self.state().handoff.insert(key.into(), value);
    }

    pub fn handoff(&self) -> Map<String, Value> {
        self.state().handoff.clone()
    }

    /// Capture a frame through the connection and keep it in history.
    pub async fn capture(&self, description: &str) -> Result<Screenshot, AutomationError> {
        let shot = self
            .connection
            .capture_screen()
            .await?
            .with_description(description);
        self.push_screenshot(shot.clone());
        Ok(shot)
    }

    /// Connect with the session's target.
    pub async fn connect(&self) -> Result<(), AutomationError> {
        let result = self.connection.connect(&self.target).await?;
        let message = result.into_result()?;
        self.set_connected(true);
        self.log_action(format!("Connected to {}: {}", self.target.address(), message));
        Ok(())
    }

    /// Best-effort disconnect. Does nothing when already disconnected.
    pub async fn disconnect(&self) -> Result<(), AutomationError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.set_connected(false);
        match self.connection.disconnect().await {
            Ok(result) if result.success => {
                self.log_action(format!("Disconnected: {}", result.message));
                Ok(())
            }
            Ok(result) => Err(self.record_error(
                "Disconnect",
                AutomationError::Connection(result.message),
            )),
            Err(e) => Err(self.record_error("Disconnect", e)),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state();
        SessionSummary {
            is_connected: state.is_connected,
            current_app: state.current_app.clone(),
            screenshots_count: state.screenshots.len(),
            actions_count: state.action_log.len(),
            errors_count: state.error_log.len(),
            navigator_completed: state.navigator_done,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target.address())
            .field("phase", &self.phase())
            .finish()
    }
}
