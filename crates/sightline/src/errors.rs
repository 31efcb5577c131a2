use thiserror::Error;

/// Errors raised by the vision-guided automation core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutomationError {
    /// Connecting to or disconnecting from a backend failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A screenshot could not be obtained.
    #[error("Capture error: {0}")]
    Capture(String),

    /// The locator exhausted every strategy and retry.
    #[error("Element not found: '{description}' after {attempts} attempt(s)")]
    ElementNotFound { description: String, attempts: u32 },

    /// A click/type/scroll/key action was rejected by the backend.
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// Post-action evidence was insufficient.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Identity verification failed or its evidence was missing.
    #[error("CRITICAL SAFETY FAILURE: {0}")]
    SafetyCritical(String),

    /// Invalid or missing target parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The object detector or text recognizer failed.
    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AutomationError {
    /// Capture and action errors are retried locally before they surface.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Capture(_) | Self::ActionFailed(_))
    }

    pub fn is_safety_critical(&self) -> bool {
        matches!(self, Self::SafetyCritical(_))
    }

    /// Short machine-readable name of the error kind, used in tool responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Capture(_) => "capture_error",
            Self::ElementNotFound { .. } => "element_not_found",
            Self::ActionFailed(_) => "action_failure",
            Self::VerificationFailed(_) => "verification_failure",
            Self::SafetyCritical(_) => "safety_critical_failure",
            Self::Configuration(_) => "configuration_error",
            Self::Timeout(_) => "timeout",
            Self::Recognition(_) => "recognition_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<image::ImageError> for AutomationError {
    fn from(err: image::ImageError) -> Self {
        AutomationError::Capture(format!("image error: {err}"))
    }
}

/// Which session phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Navigator,
    Controller,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Navigator => write!(f, "navigator"),
            Phase::Controller => write!(f, "controller"),
        }
    }
}

/// A phase aborted at a named step.
#[derive(Error, Debug, Clone)]
#[error("{phase} phase failed at '{step}': {source}")]
pub struct PhaseError {
    pub phase: Phase,
    pub step: String,
    #[source]
    pub source: AutomationError,
}

impl PhaseError {
    pub fn new(phase: Phase, step: impl Into<String>, source: AutomationError) -> Self {
        Self {
            phase,
            step: step.into(),
            source,
        }
    }

    pub fn safety_critical(&self) -> bool {
        self.source.is_safety_critical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(AutomationError::Capture("x".into()).is_retryable());
        assert!(AutomationError::ActionFailed("x".into()).is_retryable());
        assert!(!AutomationError::VerificationFailed("x".into()).is_retryable());
        assert!(!AutomationError::SafetyCritical("x".into()).is_retryable());
        assert!(!AutomationError::ElementNotFound {
            description: "Submit".into(),
            attempts: 3
        }
        .is_retryable());
    }

    #[test]
    fn test_phase_error_message_names_step() {
        let err = PhaseError::new(
            Phase::Navigator,
            "verify identity",
            AutomationError::SafetyCritical("only 1 identifier verified".into()),
        );
        assert!(err.safety_critical());
        let msg = err.to_string();
        assert!(msg.contains("navigator"));
        assert!(msg.contains("verify identity"));
        assert!(msg.contains("CRITICAL SAFETY FAILURE"));
    }
}
