//! Resolves a natural-language description to a concrete UI element.
//!
//! Each attempt runs three strategies against one fresh capture, first hit wins:
//! direct text match, clickable-element match, keyword match.

use crate::executor::ActionExecutor;
use crate::fusion::FusionEngine;
use crate::retry::{Backoff, RetryPolicy};
use crate::screenshot::Screenshot;
use crate::session::Session;
use crate::types::{ScrollDirection, UIElement};
use crate::utils::normalize;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub max_retries: u32,
    /// Flat delay between attempts
    pub retry_delay_ms: u64,
    pub max_scrolls: u32,
    /// Pixels scrolled before each extra scroll-fallback attempt
    pub scroll_pixels: u32,
    /// Pause after a scroll before re-capturing
    pub scroll_settle_ms: u64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1500,
            max_scrolls: 3,
            scroll_pixels: 300,
            scroll_settle_ms: 1000,
        }
    }
}

/// Which layer of the search produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStrategy {
    TextMatch,
    Clickable,
    Keyword,
}

impl fmt::Display for LocateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateStrategy::TextMatch => write!(f, "text match"),
            LocateStrategy::Clickable => write!(f, "clickable match"),
            LocateStrategy::Keyword => write!(f, "keyword match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatedElement {
    pub element: UIElement,
    pub strategy: LocateStrategy,
    /// 1-based attempt on which the element was found
    pub attempt: u32,
    /// Scrolls performed before the element was found
    pub scroll_attempt: u32,
}

pub struct ElementLocator {
    fusion: Arc<FusionEngine>,
    config: LocatorConfig,
}

impl ElementLocator {
    pub fn new(fusion: Arc<FusionEngine>, config: LocatorConfig) -> Self {
        Self { fusion, config }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn fusion(&self) -> &Arc<FusionEngine> {
        &self.fusion
    }

    /// One layered search pass over an already captured frame.
    pub async fn locate_in(
        &self,
        screenshot: &Screenshot,
        description: &str,
    ) -> Result<Option<(UIElement, LocateStrategy)>, AutomationError> {
        let query = normalize(description);
        if query.is_empty() {
            return Err(AutomationError::Configuration(
                "element description is empty".to_string(),
            ));
        }

        let perception = self.fusion.perceive(screenshot).await?;
        let direct = self.fusion.match_perception(&perception, description);
        if let Some(element) = direct.into_iter().next() {
            return Ok(Some((element, LocateStrategy::TextMatch)));
        }

        let elements = self.fusion.fuse_perception(&perception);

        if let Some(element) = elements.iter().find(|e| {
            e.is_clickable() && e.folded_text().is_some_and(|t| t.contains(&query))
        }) {
            return Ok(Some((element.clone(), LocateStrategy::Clickable)));
        }

        let keywords: Vec<&str> = query.split_whitespace().collect();
        let keyword_hit = elements.into_iter().find(|e| {
            e.folded_text()
                .is_some_and(|t| keywords.iter().any(|k| t.contains(k)))
        });
        Ok(keyword_hit.map(|e| (e, LocateStrategy::Keyword)))
    }

    /// Capture and search up to `max_retries` times with a flat delay between attempts.
    #[instrument(skip(self, session))]
    pub async fn locate(
        &self,
        session: &Session,
        description: &str,
        max_retries: u32,
    ) -> Result<LocatedElement, AutomationError> {
        let policy = RetryPolicy::new(
            max_retries,
            Backoff::fixed(Duration::from_millis(self.config.retry_delay_ms)),
        );
        let capture_note = format!("Locating '{description}'");

        let result = policy
            .run_until(
                "locate",
                |e| e.is_retryable() || matches!(e, AutomationError::ElementNotFound { .. }),
                |attempt| {
                    let capture_note = &capture_note;
                    async move {
                        let shot = session.capture(capture_note).await?;
                        match self.locate_in(&shot, description).await? {
                            Some((element, strategy)) => Ok(LocatedElement {
                                element,
                                strategy,
                                attempt,
                                scroll_attempt: 0,
                            }),
                            None => {
                                debug!("'{}' not found on attempt {}", description, attempt);
                                Err(AutomationError::ElementNotFound {
                                    description: description.to_string(),
                                    attempts: attempt,
                                })
                            }
                        }
                    }
                },
            )
            .await;

        let found = result?;
        info!(
            "Found '{}' by {} at {} (confidence {:.2})",
            description, found.strategy, found.element.center, found.element.confidence
        );
        session.log_action(format!(
            "Located '{}' by {} at {}",
            description, found.strategy, found.element.center
        ));
        Ok(found)
    }

    /// `locate` with the configured retry count.
    pub async fn locate_default(
        &self,
        session: &Session,
        description: &str,
    ) -> Result<LocatedElement, AutomationError> {
        self.locate(session, description, self.config.max_retries).await
    }

    /// Search the current view, then scroll down and search again, up to `max_scrolls` times.
    #[instrument(skip(self, session, executor))]
    pub async fn scroll_and_search(
        &self,
        session: &Session,
        executor: &ActionExecutor,
        description: &str,
        max_scrolls: u32,
    ) -> Result<LocatedElement, AutomationError> {
        for scroll_attempt in 0..=max_scrolls {
            if scroll_attempt > 0 {
                if let Err(e) = executor
                    .scroll(session, ScrollDirection::Down, self.config.scroll_pixels)
                    .await
                {
                    warn!("Scroll {} failed: {}", scroll_attempt, e);
                    continue;
                }
                if self.config.scroll_settle_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.scroll_settle_ms)).await;
                }
            }

            let shot = session.capture(&format!("Search '{description}'")).await?;
            if let Some((element, strategy)) = self.locate_in(&shot, description).await? {
                session.log_action(format!(
                    "Found '{}' by {} after {} scroll(s)",
                    description, strategy, scroll_attempt
                ));
                return Ok(LocatedElement {
                    element,
                    strategy,
                    attempt: scroll_attempt + 1,
                    scroll_attempt,
                });
            }
        }

        Err(AutomationError::ElementNotFound {
            description: description.to_string(),
            attempts: max_scrolls + 1,
        })
    }

    /// Direct search first, scroll fallback when that is exhausted. `ElementNotFound`
    /// only comes back once both are spent.
    pub async fn find_with_fallback(
        &self,
        session: &Session,
        executor: &ActionExecutor,
        description: &str,
    ) -> Result<LocatedElement, AutomationError> {
        match self.locate_default(session, description).await {
            Ok(found) => Ok(found),
            Err(AutomationError::ElementNotFound { .. }) => {
                info!("Direct search for '{}' failed, trying scroll search", description);
                self.scroll_and_search(session, executor, description, self.config.max_scrolls)
                    .await
            }
            Err(e) => Err(e),
        }
    }
}
