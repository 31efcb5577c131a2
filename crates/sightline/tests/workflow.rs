//! Drives the navigator/controller workflow against a scripted in-memory desktop.
//!
//! The fake desktop encodes its scene and scroll count in pixel (0, 0) of every frame, so
//! the fake detector and recognizer can answer from the screenshot alone.

use async_trait::async_trait;
use image::Rgba;
use sightline::{
    ActionResult, Automation, AutomationConfig, AutomationError, BBox, Connection,
    ConnectionResult, ConnectionTarget, Controller, DetectedObject, FormField, MouseButton,
    ObjectDetector, Phase, Screenshot, ScrollDirection, Session, SessionPhase, SessionReport,
    TextRecognizer, TextRegion, Toolkit,
};
use std::sync::{Arc, Mutex};

const DESKTOP: u8 = 0;
const APP: u8 = 1;
const SAVED: u8 = 2;

const ICON: BBox = BBox { x1: 80, y1: 80, x2: 120, y2: 120 };
const SUBMIT_BUTTON: BBox = BBox { x1: 400, y1: 300, x2: 500, y2: 350 };
const SUBMIT_TEXT: BBox = BBox { x1: 420, y1: 320, x2: 460, y2: 340 };
const COMMENT_LABEL: BBox = BBox { x1: 100, y1: 400, x2: 180, y2: 420 };

struct DesktopState {
    scene: u8,
    scrolls: u8,
    connected: bool,
    captures: u32,
    clicks: Vec<(i32, i32)>,
    typed: Vec<String>,
    disconnects: u32,
}

/// Scripted desktop shared by the connection and the perception fakes.
struct FakeDesktop {
    state: Mutex<DesktopState>,
    /// Scrolls needed before the Submit button comes into view
    submit_after_scrolls: u8,
    banner_name: String,
}

impl FakeDesktop {
    fn new(submit_after_scrolls: u8, banner_name: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DesktopState {
                scene: DESKTOP,
                scrolls: 0,
                connected: false,
                captures: 0,
                clicks: Vec::new(),
                typed: Vec::new(),
                disconnects: 0,
            }),
            submit_after_scrolls,
            banner_name: banner_name.to_string(),
        })
    }

    fn frame(scene: u8, scrolls: u8) -> Screenshot {
        let mut shot = Screenshot::filled(1000, 800, [scene * 80, 0, 0, 255]);
        shot.image.put_pixel(0, 0, Rgba([scene, scrolls, 0, 255]));
        shot
    }

    fn decode(shot: &Screenshot) -> (u8, u8) {
        let p = shot.image.get_pixel(0, 0).0;
        (p[0], p[1])
    }

    fn submit_visible(&self, scrolls: u8) -> bool {
        scrolls >= self.submit_after_scrolls
    }

    fn captures(&self) -> u32 {
        self.state.lock().unwrap().captures
    }

    fn clicks(&self) -> Vec<(i32, i32)> {
        self.state.lock().unwrap().clicks.clone()
    }
}

struct FakeConnection(Arc<FakeDesktop>);

#[async_trait]
impl Connection for FakeConnection {
    async fn connect(&self, target: &ConnectionTarget) -> Result<ConnectionResult, AutomationError> {
        self.0.state.lock().unwrap().connected = true;
        Ok(ConnectionResult::ok(format!("connected to {}", target.host)))
    }

    async fn disconnect(&self) -> Result<ConnectionResult, AutomationError> {
        let mut state = self.0.state.lock().unwrap();
        state.connected = false;
        state.disconnects += 1;
        Ok(ConnectionResult::ok("disconnected"))
    }

    fn is_connected(&self) -> bool {
        self.0.state.lock().unwrap().connected
    }

    async fn capture_screen(&self) -> Result<Screenshot, AutomationError> {
        let mut state = self.0.state.lock().unwrap();
        if !state.connected {
            return Err(AutomationError::Capture("not connected".into()));
        }
        state.captures += 1;
        Ok(FakeDesktop::frame(state.scene, state.scrolls))
    }

    async fn click(&self, x: i32, y: i32, _button: MouseButton) -> Result<ActionResult, AutomationError> {
        let mut state = self.0.state.lock().unwrap();
        state.clicks.push((x, y));
        let p = sightline::Point::new(x, y);
        if state.scene == DESKTOP && ICON.union(&BBox::new(70, 125, 130, 140)).contains(&p) {
            state.scene = APP;
        } else if state.scene == APP && SUBMIT_BUTTON.contains(&p) && self.0.submit_visible(state.scrolls) {
            state.scene = SAVED;
        }
        Ok(ActionResult::ok(format!("clicked ({x}, {y})")))
    }

    async fn type_text(&self, text: &str) -> Result<ActionResult, AutomationError> {
        self.0.state.lock().unwrap().typed.push(text.to_string());
        Ok(ActionResult::ok("typed"))
    }

    async fn key_press(&self, key: &str) -> Result<ActionResult, AutomationError> {
        Ok(ActionResult::ok(format!("pressed {key}")))
    }

    async fn scroll(
        &self,
        _x: i32,
        _y: i32,
        direction: ScrollDirection,
        _pixels: u32,
    ) -> Result<ActionResult, AutomationError> {
        let mut state = self.0.state.lock().unwrap();
        if direction == ScrollDirection::Down {
            state.scrolls += 1;
        }
        Ok(ActionResult::ok("scrolled"))
    }
}

struct FakeDetector(Arc<FakeDesktop>);
struct FakeRecognizer(Arc<FakeDesktop>);

#[async_trait]
impl ObjectDetector for FakeDetector {
    async fn detect(&self, shot: &Screenshot) -> Result<Vec<DetectedObject>, AutomationError> {
        let (scene, scrolls) = FakeDesktop::decode(shot);
        let mut out = Vec::new();
        match scene {
            DESKTOP => out.push(DetectedObject::new(ICON, "icon", 0.9)),
            APP if self.0.submit_visible(scrolls) => {
                out.push(DetectedObject::new(SUBMIT_BUTTON, "button", 0.8))
            }
            _ => {}
        }
        Ok(out)
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn read_text(
        &self,
        shot: &Screenshot,
        region: Option<BBox>,
    ) -> Result<Vec<TextRegion>, AutomationError> {
        let (scene, scrolls) = FakeDesktop::decode(shot);
        let text = |rect: BBox, t: &str| TextRegion::from_rect(rect, t, 0.9);
        let mut out = Vec::new();
        match scene {
            DESKTOP => {
                out.push(text(BBox::new(70, 125, 130, 140), "ChartViewer"));
                out.push(text(BBox::new(10, 770, 60, 790), "Start"));
                out.push(text(BBox::new(300, 770, 400, 790), "Taskbar"));
            }
            APP => {
                out.push(text(BBox::new(10, 10, 200, 40), &format!("Patient: {}", self.0.banner_name)));
                out.push(text(BBox::new(220, 10, 360, 40), "MRN: 123456"));
                out.push(text(BBox::new(400, 50, 700, 80), "ChartViewer - Patient Chart"));
                out.push(text(BBox::new(10, 180, 50, 200), "File"));
                out.push(text(COMMENT_LABEL, "Comment"));
                if self.0.submit_visible(scrolls) {
                    out.push(text(SUBMIT_TEXT, "Submit"));
                }
            }
            SAVED => out.push(text(BBox::new(400, 380, 600, 410), "Record saved")),
            _ => {}
        }
        Ok(match region {
            Some(r) => out.into_iter().filter(|t| r.contains(&t.center())).collect(),
            None => out,
        })
    }
}

fn fast_config() -> AutomationConfig {
    let mut config = AutomationConfig::default();
    config.connection.host = "test-vm".into();
    config.target.app_name = "ChartViewer.exe".into();
    config.target.button_text = "Submit".into();
    config.target.app_indicators = vec!["File".into()];
    config.target.expected_outcomes = vec!["Saved".into()];
    config.identity.name = "John Doe".into();
    config.identity.mrn = "123456".into();

    config.timeouts.connection_secs = 5;
    config.timeouts.desktop_load_secs = 0;
    config.timeouts.app_launch_secs = 0;
    config.timeouts.poll_interval_ms = 0;
    config.timeouts.step_delay_ms = 0;
    config.locator.retry_delay_ms = 0;
    config.locator.scroll_settle_ms = 0;
    config.executor.settle_delay_ms = 0;
    config.executor.retry_delay_ms = 0;
    config.executor.double_click_interval_ms = 0;
    config.verifier.wait_delay_ms = 0;
    config.safety.retry_delay_ms = 0;
    config.logging.save_screenshots = false;
    config
}

fn automation(desktop: &Arc<FakeDesktop>, config: AutomationConfig) -> Automation {
    Automation::new(
        config,
        Box::new(FakeConnection(desktop.clone())),
        Arc::new(FakeDetector(desktop.clone())),
        Arc::new(FakeRecognizer(desktop.clone())),
    )
    .unwrap()
}

#[tokio::test]
async fn full_run_completes_and_persists_report() {
    let desktop = FakeDesktop::new(0, "John Doe");
    let mut config = fast_config();
    let dir = tempfile::tempdir().unwrap();
    config.logging.report_dir = Some(dir.path().to_path_buf());
    config.logging.save_screenshots = true;
    let auto = automation(&desktop, config);

    let outcome = auto.run().await.unwrap();
    let click = outcome.controller.unwrap().click.unwrap();
    assert_eq!(click.element.element.center, sightline::Point::new(450, 325));
    assert_eq!(click.element.scroll_attempt, 0);
    assert_eq!(outcome.safety.unwrap().verified_fields, vec!["name", "mrn"]);

    let session = auto.session();
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(!session.is_connected());
    assert_eq!(desktop.state.lock().unwrap().disconnects, 1);
    assert_eq!(desktop.state.lock().unwrap().scene, SAVED);

    auto.shutdown().await;
    assert_eq!(desktop.state.lock().unwrap().disconnects, 1);

    let path = auto.save_report().unwrap();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with(&format!("session_{}_", session.id())));
    let report: SessionReport =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report.session_id, session.id());
    assert_eq!(report.vm_target.host, "test-vm");
    assert_eq!(report.vm_target.target_button, "Submit");
    assert!(report.session_summary.navigator_completed);
    assert_eq!(report.session_summary.current_app.as_deref(), Some("ChartViewer.exe"));
    assert!(report.errors.is_empty());
    assert!(!report.action_log.iter().any(|l| l.contains("John Doe")));

    let shots = dir.path().join(format!("session_{}_screenshots", session.id()));
    assert!(std::fs::read_dir(shots).unwrap().count() > 0);
}

#[tokio::test]
async fn scroll_fallback_finds_target_after_one_scroll() {
    let desktop = FakeDesktop::new(1, "John Doe");
    let auto = automation(&desktop, fast_config());

    let outcome = auto.run().await.unwrap();
    let click = outcome.controller.unwrap().click.unwrap();
    assert_eq!(click.element.scroll_attempt, 1);

    let scrolls = auto
        .session()
        .action_log()
        .iter()
        .filter(|line| line.contains("] Scrolled down"))
        .count();
    assert_eq!(scrolls, 1);
    assert_eq!(desktop.state.lock().unwrap().scrolls, 1);
    assert!(auto.session().error_log().is_empty());
    assert_eq!(auto.session().summary().errors_count, 0);
}

#[tokio::test]
async fn identity_mismatch_aborts_before_controller() {
    let desktop = FakeDesktop::new(0, "Jane Roe");
    let auto = automation(&desktop, fast_config());

    let err = auto.run().await.unwrap_err();
    assert!(err.safety_critical());
    assert_eq!(err.phase, Phase::Navigator);
    assert_eq!(err.step, "verify identity");
    assert!(matches!(err.source, AutomationError::SafetyCritical(_)));

    // only the double-click on the launcher icon
    assert_eq!(desktop.clicks().len(), 2);
    assert_eq!(auto.session().phase(), SessionPhase::Failed);
    assert!(!auto.session().navigator_done());
    assert!(!auto.session().is_connected());
    let errors = auto.session().error_log();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Navigator failed at 'verify identity'"));
    assert!(errors[0].contains("Identity mismatch"));
}

#[tokio::test]
async fn locator_reports_attempt_count_when_nothing_matches() {
    let desktop = FakeDesktop::new(0, "John Doe");
    let config = fast_config();
    let session = Session::new(Box::new(FakeConnection(desktop.clone())), config.connection.clone());
    session.connect().await.unwrap();
    let toolkit = Toolkit::new(
        Arc::new(FakeDetector(desktop.clone())),
        Arc::new(FakeRecognizer(desktop.clone())),
        &config,
    );

    let err = toolkit.locator.locate(&session, "Discharge", 4).await.unwrap_err();
    assert_eq!(
        err,
        AutomationError::ElementNotFound {
            description: "Discharge".into(),
            attempts: 4
        }
    );
    assert_eq!(desktop.captures(), 4);
}

#[tokio::test]
async fn controller_requires_completed_navigator() {
    let desktop = FakeDesktop::new(0, "John Doe");
    let config = fast_config();
    let session = Session::new(Box::new(FakeConnection(desktop.clone())), config.connection.clone());
    let toolkit = Toolkit::new(
        Arc::new(FakeDetector(desktop.clone())),
        Arc::new(FakeRecognizer(desktop.clone())),
        &config,
    );

    let err = Controller::new(&session, &config, &toolkit).run().await.unwrap_err();
    assert_eq!(err.phase, Phase::Controller);
    assert_eq!(err.step, "check prerequisites");
    assert!(desktop.clicks().is_empty());
}

#[tokio::test]
async fn desktop_timeout_fails_navigation() {
    let desktop = FakeDesktop::new(0, "John Doe");
    let mut config = fast_config();
    config.target.desktop_indicators = vec!["Login Screen".into()];
    let auto = automation(&desktop, config);

    let err = auto.run_navigation_only().await.unwrap_err();
    assert_eq!(err.step, "wait for desktop");
    assert!(matches!(err.source, AutomationError::Timeout(_)));
    assert!(!auto.session().is_connected());
}

#[tokio::test]
async fn navigation_only_run_skips_controller() {
    let desktop = FakeDesktop::new(0, "John Doe");
    let auto = automation(&desktop, fast_config());

    let outcome = auto.run_navigation_only().await.unwrap();
    assert!(outcome.controller.is_none());
    assert_eq!(outcome.app_name, "ChartViewer");
    assert!(auto.session().navigator_done());
    assert_eq!(auto.session().phase(), SessionPhase::Completed);
    assert_eq!(desktop.state.lock().unwrap().scene, APP);
    let handoff = auto.session().handoff();
    assert_eq!(handoff["identity_verified"], serde_json::json!(true));
    assert_eq!(handoff["app_name"], serde_json::json!("ChartViewer.exe"));
}

#[tokio::test]
async fn form_fields_are_typed_then_submitted() {
    let desktop = FakeDesktop::new(0, "John Doe");
    let mut config = fast_config();
    config.target.form_fields = vec![FormField {
        label: "Comment".into(),
        value: "Follow-up in two weeks".into(),
    }];
    config.target.submit_button = Some("Submit".into());
    let auto = automation(&desktop, config);

    let outcome = auto.run().await.unwrap();
    let controller = outcome.controller.unwrap();
    assert_eq!(controller.fields_filled, vec!["Comment"]);
    assert!(controller.click.is_some());
    assert_eq!(
        desktop.state.lock().unwrap().typed,
        vec!["Follow-up in two weeks".to_string()]
    );
    assert!(desktop.clicks().contains(&(140, 410)));
}
