//! `Connection` backed by a remote UI agent speaking JSON over HTTP.
//!
//! `GET /health` must answer 2xx before the connection counts as open. Every desktop
//! action is a `POST /execute` with an `action`-tagged body; captures come back as a
//! base64 PNG in `screenshot`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sightline::{
    ActionResult, AutomationError, Connection, ConnectionResult, ConnectionTarget, MouseButton,
    Screenshot, ScrollDirection,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const API_KEY_HEADER: &str = "X-API-Key";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemoteAction<'a> {
    Capture,
    Click {
        x: i32,
        y: i32,
        button: MouseButton,
    },
    TypeText {
        text: &'a str,
    },
    KeyPress {
        key: &'a str,
    },
    Scroll {
        x: i32,
        y: i32,
        direction: ScrollDirection,
        pixels: u32,
    },
}

impl RemoteAction<'_> {
    fn name(&self) -> &'static str {
        match self {
            RemoteAction::Capture => "capture",
            RemoteAction::Click { .. } => "click",
            RemoteAction::TypeText { .. } => "type_text",
            RemoteAction::KeyPress { .. } => "key_press",
            RemoteAction::Scroll { .. } => "scroll",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub screenshot: Option<String>,
    pub error: Option<String>,
}

impl RemoteReply {
    fn into_action_result(self) -> ActionResult {
        if self.success {
            ActionResult::ok(self.message)
        } else {
            ActionResult::failed(self.error.unwrap_or(self.message))
        }
    }

    fn into_screenshot(self) -> Result<Screenshot, AutomationError> {
        if !self.success {
            return Err(AutomationError::Capture(
                self.error.unwrap_or_else(|| "remote capture failed".to_string()),
            ));
        }
        let data = self
            .screenshot
            .ok_or_else(|| AutomationError::Capture("reply carried no screenshot".to_string()))?;
        Screenshot::from_base64(&data)
    }
}

/// Base URL for the agent. A host that already carries a scheme is used as is.
pub fn base_url(target: &ConnectionTarget) -> String {
    let host = target.host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}:{}", host, target.port)
    }
}

pub struct RemoteAgentConnection {
    client: reqwest::Client,
    base: String,
    api_key: Option<String>,
    connected: AtomicBool,
}

impl RemoteAgentConnection {
    pub fn new(target: &ConnectionTarget) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base: base_url(target),
            api_key: target.api_key.clone(),
            connected: AtomicBool::new(false),
        })
    }

    fn with_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header(API_KEY_HEADER, key),
            None => req,
        }
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base);
        let resp = self.with_key(self.client.get(&url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("health check failed ({}): {}", status, text));
        }
        Ok(())
    }

    async fn post(&self, action: &RemoteAction<'_>) -> Result<RemoteReply> {
        let url = format!("{}/execute", self.base);
        debug!("Remote action {} -> {}", action.name(), url);
        let resp = self
            .with_key(self.client.post(&url))
            .json(action)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!("Remote agent error: {} - {}", status, text);
            return Err(anyhow!("remote agent error ({}): {}", status, text));
        }
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| anyhow!("Failed to parse agent reply: {}", e))
    }

    fn ensure_connected(&self) -> Result<(), AutomationError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AutomationError::Connection(format!("not connected to {}", self.base)))
        }
    }

    async fn act(&self, action: RemoteAction<'_>) -> Result<ActionResult, AutomationError> {
        self.ensure_connected()?;
        let name = action.name();
        self.post(&action)
            .await
            .map(RemoteReply::into_action_result)
            .map_err(|e| AutomationError::ActionFailed(format!("{name}: {e}")))
    }
}

#[async_trait]
impl Connection for RemoteAgentConnection {
    #[instrument(level = "debug", skip(self, target), fields(base = %self.base))]
    async fn connect(&self, target: &ConnectionTarget) -> Result<ConnectionResult, AutomationError> {
        match self.health().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!("Connected to remote agent at {}", self.base);
                Ok(ConnectionResult::ok(format!("connected to {}", target.address())))
            }
            Err(e) => Err(AutomationError::Connection(format!(
                "remote agent at {} unreachable: {e}",
                self.base
            ))),
        }
    }

    async fn disconnect(&self) -> Result<ConnectionResult, AutomationError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(ConnectionResult::ok("disconnected from remote agent"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn capture_screen(&self) -> Result<Screenshot, AutomationError> {
        self.ensure_connected()?;
        let reply = self
            .post(&RemoteAction::Capture)
            .await
            .map_err(|e| AutomationError::Capture(e.to_string()))?;
        reply.into_screenshot()
    }

    async fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<ActionResult, AutomationError> {
        self.act(RemoteAction::Click { x, y, button }).await
    }

    async fn type_text(&self, text: &str) -> Result<ActionResult, AutomationError> {
        self.act(RemoteAction::TypeText { text }).await
    }

    async fn key_press(&self, key: &str) -> Result<ActionResult, AutomationError> {
        self.act(RemoteAction::KeyPress { key }).await
    }

    async fn scroll(
        &self,
        x: i32,
        y: i32,
        direction: ScrollDirection,
        pixels: u32,
    ) -> Result<ActionResult, AutomationError> {
        self.act(RemoteAction::Scroll {
            x,
            y,
            direction,
            pixels,
        })
        .await
    }
}
