//! Job configuration. Every component receives its own section by value.

use crate::connection::{ConnectionKind, ConnectionTarget};
use crate::executor::ExecutorConfig;
use crate::fusion::FusionConfig;
use crate::locator::LocatorConfig;
use crate::safety::SafetyConfig;
use crate::verifier::VerifierConfig;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One (label, value) pair of a form to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Application to launch, matched against desktop icon captions
    pub app_name: String,
    /// Control the controller phase clicks
    pub button_text: String,
    /// Text that shows the desktop is ready
    pub desktop_indicators: Vec<String>,
    /// Text that shows the application finished loading
    pub app_indicators: Vec<String>,
    /// At least one must be found after the click when non-empty
    pub expected_outcomes: Vec<String>,
    pub form_fields: Vec<FormField>,
    pub submit_button: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            app_name: "MyApp.exe".to_string(),
            button_text: "Submit".to_string(),
            desktop_indicators: vec!["Desktop".into(), "Start".into(), "Taskbar".into()],
            app_indicators: Vec::new(),
            expected_outcomes: Vec::new(),
            form_fields: Vec::new(),
            submit_button: None,
        }
    }
}

impl TargetConfig {
    /// Application name without a trailing `.exe`, as it usually appears on screen.
    pub fn app_display_name(&self) -> &str {
        let name = self.app_name.trim();
        name.strip_suffix(".exe")
            .or_else(|| name.strip_suffix(".EXE"))
            .unwrap_or(name)
    }
}

/// Patient identity shown in the application banner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    pub mrn: String,
    pub dob: String,
}

impl IdentityConfig {
    /// `(field, value)` pairs in banner order.
    pub fn identifiers(&self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), self.name.clone()),
            ("mrn".to_string(), self.mrn.clone()),
            ("dob".to_string(), self.dob.clone()),
        ]
    }

    pub fn is_configured(&self) -> bool {
        [&self.name, &self.mrn, &self.dob]
            .iter()
            .any(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connection_secs: u64,
    pub desktop_load_secs: u64,
    pub app_launch_secs: u64,
    /// Interval between desktop/app readiness polls
    pub poll_interval_ms: u64,
    /// Pause between workflow steps
    pub step_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_secs: 30,
            desktop_load_secs: 60,
            app_launch_secs: 30,
            poll_interval_ms: 2000,
            step_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub save_screenshots: bool,
    /// Allow identity values in logs and action entries
    pub log_phi: bool,
    pub report_dir: Option<PathBuf>,
    /// Directory for rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            save_screenshots: true,
            log_phi: false,
            report_dir: None,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub connection: ConnectionTarget,
    pub target: TargetConfig,
    pub identity: IdentityConfig,
    pub timeouts: TimeoutConfig,
    pub fusion: FusionConfig,
    pub locator: LocatorConfig,
    pub executor: ExecutorConfig,
    pub verifier: VerifierConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AutomationConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, AutomationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AutomationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AutomationConfig::default();

        if let Some(host) = non_empty(lookup("VM_HOST")) {
            config.connection.host = host;
        }
        if let Some(port) = non_empty(lookup("VM_PORT")) {
            config.connection.port = port.trim().parse().map_err(|_| {
                AutomationError::Configuration(format!("VM_PORT is not a valid port: '{port}'"))
            })?;
        }
        config.connection.username = non_empty(lookup("VM_USERNAME"));
        config.connection.password = non_empty(lookup("VM_PASSWORD"));
        if let Some(kind) = non_empty(lookup("CONNECTION_TYPE")) {
            config.connection.kind = kind.parse::<ConnectionKind>()?;
        }
        config.connection.api_key = non_empty(lookup("REMOTE_API_KEY"));

        if let Some(app) = non_empty(lookup("TARGET_APP")) {
            config.target.app_name = app;
        }
        if let Some(button) = non_empty(lookup("TARGET_BUTTON")) {
            config.target.button_text = button;
        }

        config.identity.name = lookup("PATIENT_NAME").unwrap_or_default();
        config.identity.mrn = lookup("PATIENT_MRN").unwrap_or_default();
        config.identity.dob = lookup("PATIENT_DOB").unwrap_or_default();

        if let Some(level) = non_empty(lookup("LOG_LEVEL")) {
            config.logging.level = level.to_lowercase();
        }
        if let Some(save) = lookup("SAVE_SCREENSHOTS") {
            config.logging.save_screenshots = parse_bool(&save);
        }
        if let Some(phi) = lookup("LOG_PHI") {
            config.logging.log_phi = parse_bool(&phi);
        }
        if let Some(dir) = non_empty(lookup("REPORT_DIR")) {
            config.logging.report_dir = Some(PathBuf::from(dir));
        }

        Ok(config.normalized())
    }

    /// Load a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, AutomationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AutomationError> {
        let config: AutomationConfig = serde_json::from_str(raw)
            .map_err(|e| AutomationError::Configuration(format!("invalid config JSON: {e}")))?;
        Ok(config.normalized())
    }

    pub fn to_json_pretty(&self) -> Result<String, AutomationError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AutomationError::Internal(format!("cannot serialize config: {e}")))
    }

    /// Push the global `log_phi` switch into the sections that log identity data.
    pub fn normalized(mut self) -> Self {
        self.executor.log_phi = self.logging.log_phi;
        self.safety.log_phi = self.logging.log_phi;
        self
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        let fail = |msg: &str| -> Result<(), AutomationError> {
            Err(AutomationError::Configuration(msg.to_string()))
        };
        let blank = |s: &String| s.trim().is_empty();
        let target = &self.target;

        if self.connection.host.trim().is_empty() {
            return fail("connection host is empty");
        }
        if self.connection.port == 0 {
            return fail("connection port must be non-zero");
        }
        if self.target.app_name.trim().is_empty() {
            return fail("target application name is empty");
        }
        if target.desktop_indicators.is_empty() {
            return fail("at least one desktop ready indicator is required");
        }
        if target.desktop_indicators.iter().any(blank) {
            return fail("desktop ready indicators must not be blank");
        }
        if target.app_indicators.iter().any(blank) {
            return fail("application indicators must not be blank");
        }
        if target.expected_outcomes.iter().any(blank) {
            return fail("expected outcomes must not be blank");
        }
        if target.form_fields.is_empty() && blank(&target.button_text) {
            return fail("target button text is empty");
        }
        if target.submit_button.as_ref().is_some_and(blank) {
            return fail("submit button text is empty");
        }
        if self.fusion.proximity_threshold < 0 || self.fusion.search_radius < 0 {
            return fail("fusion distances must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.fusion.confidence_threshold) {
            return fail("fusion confidence threshold must be within 0..=1");
        }
        if !(0.0..=100.0).contains(&self.verifier.min_change_percent) {
            return fail("verifier change threshold must be a percentage");
        }
        if !(0.0 < self.safety.banner_fraction && self.safety.banner_fraction <= 1.0) {
            return fail("safety banner fraction must be within (0, 1]");
        }
        if self.safety.min_verified == 0 {
            return fail("safety gate must require at least one match");
        }
        if self.locator.max_retries == 0 {
            return fail("locator needs at least one attempt");
        }
        if target.form_fields.iter().any(|f| blank(&f.label)) {
            return fail("form fields need a label");
        }
        Ok(())
    }

    /// Example configuration written by `sample-config`.
    pub fn sample() -> Self {
        let mut config = AutomationConfig::default();
        config.connection.username = Some("operator".to_string());
        config.target.app_name = "ChartViewer.exe".to_string();
        config.target.button_text = "Open Chart".to_string();
        config.target.app_indicators = vec!["File".into(), "Patient".into()];
        config.target.expected_outcomes = vec!["Chart".into()];
        config.identity = IdentityConfig {
            name: "John Doe".into(),
            mrn: "123456".into(),
            dob: String::new(),
        };
        config.logging.report_dir = Some(PathBuf::from("sessions"));
        config
    }
}
