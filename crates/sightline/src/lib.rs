//! Vision-guided desktop automation
//!
//! Perceives a desktop through an object detector and a text recognizer, fuses both
//! streams into addressable UI elements, and drives verified click/type actions through
//! a backend-agnostic [`Connection`]. A job runs as one [`Session`] with a navigator
//! phase (connect, launch, identity gate) followed by a controller phase (locate, act,
//! verify).

pub mod automation;
pub mod config;
pub mod connection;
pub mod controller;
pub mod detection;
pub mod errors;
pub mod executor;
pub mod fusion;
pub mod locator;
pub mod navigator;
pub mod report;
pub mod retry;
pub mod safety;
pub mod screenshot;
pub mod session;
pub mod tools;
pub mod types;
pub mod utils;
pub mod verifier;

pub use automation::{Automation, RunOutcome, Toolkit};
pub use config::{AutomationConfig, FormField, IdentityConfig, TargetConfig};
pub use connection::{ActionResult, Connection, ConnectionKind, ConnectionResult, ConnectionTarget};
pub use controller::{ClickOutcome, Controller, ControllerOutcome};
pub use detection::{ObjectDetector, TextRecognizer};
pub use errors::{AutomationError, Phase, PhaseError};
pub use executor::{ActionExecutor, ActionTrace, ExecutorConfig};
pub use fusion::{fuse, FusionConfig, FusionEngine, Perception, ScreenAnalysis};
pub use locator::{ElementLocator, LocateStrategy, LocatedElement, LocatorConfig};
pub use navigator::{NavigationOutcome, Navigator};
pub use report::SessionReport;
pub use retry::{Backoff, RetryPolicy};
pub use safety::{SafetyConfig, SafetyGate};
pub use screenshot::Screenshot;
pub use session::{Session, SessionPhase, SessionSummary};
pub use tools::{ToolCall, ToolResponse, ToolRunner};
pub use types::{
    BBox, DetectedObject, ElementKind, ExpectedChange, MouseButton, Point, SafetyCheckResult,
    ScrollDirection, TextRegion, UIElement, VerificationResult,
};
pub use verifier::{ActionVerifier, ScreenComparison, VerifierConfig};
