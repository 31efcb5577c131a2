//! End-to-end runner: one session, one navigator phase, one controller phase.

use crate::config::AutomationConfig;
use crate::connection::Connection;
use crate::controller::{Controller, ControllerOutcome};
use crate::detection::{ObjectDetector, TextRecognizer};
use crate::errors::{Phase, PhaseError};
use crate::executor::ActionExecutor;
use crate::fusion::FusionEngine;
use crate::locator::ElementLocator;
use crate::navigator::{NavigationOutcome, Navigator};
use crate::report::{default_report_dir, save_screenshots, SessionReport};
use crate::safety::SafetyGate;
use crate::session::{Session, SessionPhase};
use crate::types::SafetyCheckResult;
use crate::verifier::ActionVerifier;
use crate::AutomationError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Perception and action components, built once per session and shared by both phases.
#[derive(Clone)]
pub struct Toolkit {
    pub fusion: Arc<FusionEngine>,
    pub locator: Arc<ElementLocator>,
    pub verifier: Arc<ActionVerifier>,
    pub executor: Arc<ActionExecutor>,
    pub safety: Arc<SafetyGate>,
}

impl Toolkit {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        config: &AutomationConfig,
    ) -> Self {
        let fusion = Arc::new(FusionEngine::new(
            detector,
            recognizer.clone(),
            config.fusion.clone(),
        ));
        let locator = Arc::new(ElementLocator::new(fusion.clone(), config.locator.clone()));
        let verifier = Arc::new(ActionVerifier::new(
            fusion.clone(),
            locator.clone(),
            config.verifier.clone(),
        ));
        Self {
            fusion,
            locator,
            verifier,
            executor: Arc::new(ActionExecutor::new(config.executor.clone())),
            safety: Arc::new(SafetyGate::new(recognizer, config.safety.clone())),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub session_id: String,
    pub app_name: String,
    pub safety: Option<SafetyCheckResult>,
    pub controller: Option<ControllerOutcome>,
}

pub struct Automation {
    config: AutomationConfig,
    session: Session,
    detector: Arc<dyn ObjectDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    shut_down: AtomicBool,
}

impl Automation {
    /// Validate `config` and open a session over `connection`.
    pub fn new(
        config: AutomationConfig,
        connection: Box<dyn Connection>,
        detector: Arc<dyn ObjectDetector>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Result<Self, AutomationError> {
        config.validate()?;
        let session = Session::new(connection, config.connection.clone());
        info!(session = %session.id(), target = %config.connection.address(), "Session created");
        Ok(Self {
            config,
            session,
            detector,
            recognizer,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    async fn navigate(&self) -> Result<NavigationOutcome, PhaseError> {
        let toolkit = Toolkit::new(self.detector.clone(), self.recognizer.clone(), &self.config);
        Navigator::new(&self.session, &self.config, toolkit).run().await
    }

    async fn run_phases(&self) -> Result<RunOutcome, PhaseError> {
        let nav = self.navigate().await?;
        let controller = Controller::new(&self.session, &self.config, &nav.toolkit);
        let outcome = controller.run().await?;
        self.session
            .transition(SessionPhase::Completed)
            .map_err(|e| PhaseError::new(Phase::Controller, "complete", e))?;
        Ok(RunOutcome {
            session_id: self.session.id().to_string(),
            app_name: nav.app_name,
            safety: nav.safety,
            controller: Some(outcome),
        })
    }

    /// Navigator then controller, followed by teardown regardless of the result.
    pub async fn run(&self) -> Result<RunOutcome, PhaseError> {
        let result = self.run_phases().await;
        self.finish(&result).await;
        result
    }

    async fn run_navigator_phase(&self) -> Result<RunOutcome, PhaseError> {
        let nav = self.navigate().await?;
        self.session
            .transition(SessionPhase::Completed)
            .map_err(|e| PhaseError::new(Phase::Navigator, "complete", e))?;
        Ok(RunOutcome {
            session_id: self.session.id().to_string(),
            app_name: nav.app_name,
            safety: nav.safety,
            controller: None,
        })
    }

    /// Navigator phase only, followed by teardown.
    pub async fn run_navigation_only(&self) -> Result<RunOutcome, PhaseError> {
        let result = self.run_navigator_phase().await;
        self.finish(&result).await;
        result
    }

    async fn finish(&self, result: &Result<RunOutcome, PhaseError>) {
        match result {
            Ok(_) => info!(session = %self.session.id(), "Automation completed successfully"),
            Err(e) if e.safety_critical() => {
                error!(session = %self.session.id(), "Automation aborted on safety check: {}", e)
            }
            Err(e) => error!(session = %self.session.id(), "Automation failed: {}", e),
        }
        self.shutdown().await;
    }

    /// Best-effort disconnect. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.session.disconnect().await {
            warn!("Disconnect during shutdown failed: {}", e);
        }
        self.session.log_action("Session cleanup completed");
    }

    pub fn report(&self) -> SessionReport {
        SessionReport::from_session(&self.session, &self.config)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.config
            .logging
            .report_dir
            .clone()
            .unwrap_or_else(default_report_dir)
    }

    /// Write the JSON report, plus screenshots when enabled. Returns the report path.
    pub fn save_report(&self) -> Result<PathBuf, AutomationError> {
        let dir = self.report_dir();
        if self.config.logging.save_screenshots {
            if let Err(e) = save_screenshots(&self.session, &dir) {
                warn!("Could not save screenshots: {}", e);
            }
        }
        self.report().save(&dir)
    }
}
