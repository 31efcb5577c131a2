//! Session report persistence
//!
//! Reports land in `{report_dir}/session_{id}_{YYYYMMDD_HHMMSS}.json`. Without a configured
//! directory they go to the platform data dir (`%LOCALAPPDATA%\sightline\sessions` on
//! Windows, `~/.local/share/sightline/sessions` on Linux).

use crate::config::AutomationConfig;
use crate::session::{Session, SessionSummary};
use crate::AutomationError;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default directory for reports and saved screenshots.
pub fn default_report_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sightline")
        .join("sessions")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmTarget {
    pub host: String,
    pub target_app: String,
    pub target_button: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub vm_target: VmTarget,
    pub session_summary: SessionSummary,
    pub action_log: Vec<String>,
    pub errors: Vec<String>,
}

impl SessionReport {
    pub fn from_session(session: &Session, config: &AutomationConfig) -> Self {
        Self {
            session_id: session.id().to_string(),
            vm_target: VmTarget {
                host: session.target().host.clone(),
                target_app: config.target.app_name.clone(),
                target_button: config.target.button_text.clone(),
            },
            session_summary: session.summary(),
            action_log: session.action_log(),
            errors: session.error_log(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "session_{}_{}.json",
            self.session_id,
            Local::now().format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the report into `dir`, creating it when missing.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, AutomationError> {
        fs::create_dir_all(dir).map_err(|e| {
            AutomationError::Internal(format!("cannot create {}: {e}", dir.display()))
        })?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AutomationError::Internal(format!("cannot serialize report: {e}")))?;
        fs::write(&path, json).map_err(|e| {
            AutomationError::Internal(format!("cannot write {}: {e}", path.display()))
        })?;
        info!("Session report saved to {}", path.display());
        Ok(path)
    }
}

fn sanitize(note: &str) -> String {
    note.replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(40)
        .collect()
}

/// Write the session's screenshot history as PNG files under `dir/session_{id}_screenshots`.
/// Frames that fail to encode are skipped with a warning.
pub fn save_screenshots(session: &Session, dir: &Path) -> Result<Vec<PathBuf>, AutomationError> {
    let shot_dir = dir.join(format!("session_{}_screenshots", session.id()));
    fs::create_dir_all(&shot_dir).map_err(|e| {
        AutomationError::Internal(format!("cannot create {}: {e}", shot_dir.display()))
    })?;

    let mut saved = Vec::new();
    for (i, shot) in session.screenshots().iter().enumerate() {
        let note = shot.description.as_deref().map(sanitize).unwrap_or_default();
        let name = format!(
            "{:02}_{}_{}.png",
            i,
            shot.captured_at.format("%H%M%S"),
            note
        );
        let path = shot_dir.join(name);
        match shot.save_png(&path) {
            Ok(()) => saved.push(path),
            Err(e) => warn!("Skipping screenshot {}: {}", i, e),
        }
    }
    info!("Saved {} screenshot(s) to {}", saved.len(), shot_dir.display());
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_note() {
        assert_eq!(sanitize("Before Clicked 'Submit' at (1, 2)"), "Before_Clicked_Submit_at_1_2");
    }

    #[test]
    fn test_report_json_shape() {
        let report = SessionReport {
            session_id: "abc123".into(),
            vm_target: VmTarget {
                host: "10.0.0.5".into(),
                target_app: "Chart.exe".into(),
                target_button: "Submit".into(),
            },
            session_summary: SessionSummary {
                is_connected: false,
                current_app: Some("Chart.exe".into()),
                screenshots_count: 4,
                actions_count: 7,
                errors_count: 0,
                navigator_completed: true,
            },
            action_log: vec!["[10:00:00] Connected".into()],
            errors: vec![],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["sessionId"], "abc123");
        assert_eq!(value["vmTarget"]["targetApp"], "Chart.exe");
        assert_eq!(value["sessionSummary"]["agent1Completed"], true);
        assert_eq!(value["sessionSummary"]["screenshotsCount"], 4);
        assert_eq!(value["actionLog"][0], "[10:00:00] Connected");

        let name = report.file_name();
        assert!(name.starts_with("session_abc123_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "session_abc123_20250101_120000.json".len());
    }
}
