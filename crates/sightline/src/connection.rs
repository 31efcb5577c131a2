//! Uniform contract for desktop backends (local OS, VNC, RDP, remote agents)

use crate::screenshot::Screenshot;
use crate::types::{MouseButton, ScrollDirection};
use crate::AutomationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixels moved by one emulated arrow-key scroll step.
pub const PIXELS_PER_SCROLL_KEY: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    #[default]
    Vnc,
    Rdp,
    Local,
    Remote,
}

impl std::str::FromStr for ConnectionKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vnc" => Ok(ConnectionKind::Vnc),
            "rdp" => Ok(ConnectionKind::Rdp),
            "local" | "desktop" => Ok(ConnectionKind::Local),
            "remote" | "http" => Ok(ConnectionKind::Remote),
            other => Err(AutomationError::Configuration(format!(
                "unknown connection type '{other}'"
            ))),
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub kind: ConnectionKind,
    /// API key for remote agents
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 5900,
            username: None,
            password: None,
            kind: ConnectionKind::Vnc,
            api_key: None,
        }
    }
}

impl ConnectionTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Result of connect/disconnect as reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
}

impl ConnectionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn into_result(self) -> Result<String, AutomationError> {
        if self.success {
            Ok(self.message)
        } else {
            Err(AutomationError::Connection(self.message))
        }
    }
}

/// Result of an input action as reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn into_result(self) -> Result<String, AutomationError> {
        if self.success {
            Ok(self.message)
        } else {
            Err(AutomationError::ActionFailed(self.message))
        }
    }
}

/// A desktop backend. One session owns exactly one connection.
///
/// Transport-level problems are returned as `Err`; a backend that was reachable but
/// refused the operation reports `success: false` in the result value.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> Result<ConnectionResult, AutomationError>;

    async fn disconnect(&self) -> Result<ConnectionResult, AutomationError>;

    fn is_connected(&self) -> bool;

    async fn capture_screen(&self) -> Result<Screenshot, AutomationError>;

    async fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<ActionResult, AutomationError>;

    async fn type_text(&self, text: &str) -> Result<ActionResult, AutomationError>;

    async fn key_press(&self, key: &str) -> Result<ActionResult, AutomationError>;

    /// Scroll around `(x, y)`. Backends without a native wheel get arrow-key emulation,
    /// one key press per `PIXELS_PER_SCROLL_KEY` pixels.
    async fn scroll(
        &self,
        x: i32,
        y: i32,
        direction: ScrollDirection,
        pixels: u32,
    ) -> Result<ActionResult, AutomationError> {
        let key = match direction {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        };
        let presses = (pixels / PIXELS_PER_SCROLL_KEY).max(1);
        for _ in 0..presses {
            let result = self.key_press(key).await?;
            if !result.success {
                return Ok(result);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(ActionResult::ok(format!(
            "Emulated scroll {direction} {pixels}px at ({x}, {y}) with {presses} key presses"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct KeyRecorder {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connection for KeyRecorder {
        async fn connect(&self, _t: &ConnectionTarget) -> Result<ConnectionResult, AutomationError> {
            Ok(ConnectionResult::ok("connected"))
        }
        async fn disconnect(&self) -> Result<ConnectionResult, AutomationError> {
            Ok(ConnectionResult::ok("disconnected"))
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn capture_screen(&self) -> Result<Screenshot, AutomationError> {
            Ok(Screenshot::filled(1, 1, [0, 0, 0, 255]))
        }
        async fn click(&self, _x: i32, _y: i32, _b: MouseButton) -> Result<ActionResult, AutomationError> {
            Ok(ActionResult::ok("click"))
        }
        async fn type_text(&self, _text: &str) -> Result<ActionResult, AutomationError> {
            Ok(ActionResult::ok("type"))
        }
        async fn key_press(&self, key: &str) -> Result<ActionResult, AutomationError> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(ActionResult::ok(key))
        }
    }

    #[tokio::test]
    async fn test_default_scroll_emulates_with_keys() {
        let conn = KeyRecorder {
            keys: Mutex::new(Vec::new()),
        };
        let result = conn.scroll(10, 10, ScrollDirection::Down, 120).await.unwrap();
        assert!(result.success);
        assert_eq!(*conn.keys.lock().unwrap(), vec!["down", "down", "down"]);
    }

    #[test]
    fn test_failed_results_map_to_taxonomy() {
        assert!(matches!(
            ConnectionResult::failed("refused").into_result(),
            Err(AutomationError::Connection(_))
        ));
        assert!(matches!(
            ActionResult::failed("busy").into_result(),
            Err(AutomationError::ActionFailed(_))
        ));
    }

    #[test]
    fn test_password_not_serialized() {
        let target = ConnectionTarget {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&target).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
