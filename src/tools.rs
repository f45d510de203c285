//! Tool-call dispatch.
//!
//! The tool catalogue is fixed and known at compile time, so incoming
//! `(name, arguments)` pairs are parsed into a closed enum — one variant per
//! tool, required arguments validated up front — and dispatched through a
//! single match. No failure crosses this boundary as an `Err` or a panic:
//! every call produces a `ToolResult`, error-flagged when needed.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::BrowserError;
use crate::executor;
use crate::registry::FrameSelector;
use crate::session::SessionManager;

/// Cap on the visible-text preview appended to navigate results
const NAVIGATE_PREVIEW_CHARS: usize = 200;

/// One content item of a tool response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// What every tool call returns, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn png(base64_data: String) -> Self {
        Self {
            content: vec![ToolContent::Image {
                data: base64_data,
                mime_type: "image/png".to_string(),
            }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// The concatenated text content, for logging and tests.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A validated tool call. Parsing is the only place tool names and required
/// arguments are interpreted; the dispatch match below is exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Navigate { url: String },
    Screenshot { name: String, selector: Option<String> },
    Click { selector: String },
    ClickText { text: String },
    Fill { selector: String, value: String },
    Evaluate { script: String },
    GetTextContent,
    GetHtmlContent { selector: String },
    ListPages,
    SwitchToPage { index: usize },
    Frame { name: Option<String>, selector: Option<String> },
    NewSession { url: Option<String> },
}

fn require_str(
    args: &Value,
    tool: &'static str,
    key: &'static str,
) -> Result<String, BrowserError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(BrowserError::InvalidArgument {
            tool,
            argument: key,
        })
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_owned)
}

impl ToolCall {
    pub fn parse(name: &str, args: &Value) -> Result<Self, BrowserError> {
        match name {
            "navigate" => Ok(Self::Navigate {
                url: require_str(args, "navigate", "url")?,
            }),
            "screenshot" => Ok(Self::Screenshot {
                name: require_str(args, "screenshot", "name")?,
                selector: optional_str(args, "selector"),
            }),
            "click" => Ok(Self::Click {
                selector: require_str(args, "click", "selector")?,
            }),
            "click_text" => Ok(Self::ClickText {
                text: require_str(args, "click_text", "text")?,
            }),
            "fill" => Ok(Self::Fill {
                selector: require_str(args, "fill", "selector")?,
                value: require_str(args, "fill", "value")?,
            }),
            "evaluate" => Ok(Self::Evaluate {
                script: require_str(args, "evaluate", "script")?,
            }),
            "get_text_content" => Ok(Self::GetTextContent),
            "get_html_content" => Ok(Self::GetHtmlContent {
                selector: require_str(args, "get_html_content", "selector")?,
            }),
            "list_pages" => Ok(Self::ListPages),
            "switch_to_page" => {
                let index = args.get("index").and_then(Value::as_u64).ok_or(
                    BrowserError::InvalidArgument {
                        tool: "switch_to_page",
                        argument: "index",
                    },
                )?;
                Ok(Self::SwitchToPage {
                    index: index as usize,
                })
            }
            "frame" => Ok(Self::Frame {
                name: optional_str(args, "name"),
                selector: optional_str(args, "selector"),
            }),
            "new_session" => Ok(Self::NewSession {
                url: optional_str(args, "url"),
            }),
            other => Err(BrowserError::UnknownTool(other.to_string())),
        }
    }
}

/// Maps tool calls onto sessions, the page registry, and the executor.
pub struct Dispatcher {
    sessions: Arc<SessionManager>,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle one tool call. Never fails: every error becomes an
    /// error-flagged result naming the tool.
    pub async fn dispatch(&self, name: &str, args: &Value) -> ToolResult {
        match self.try_dispatch(name, args).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "Tool call failed");
                ToolResult::error(format!("{name}: {e}"))
            }
        }
    }

    async fn try_dispatch(&self, name: &str, args: &Value) -> Result<ToolResult, BrowserError> {
        match ToolCall::parse(name, args)? {
            ToolCall::Navigate { url } => self.navigate(&url).await,
            ToolCall::NewSession { url } => self.new_session(url.as_deref()).await,
            ToolCall::Screenshot { name, selector } => {
                self.screenshot(&name, selector.as_deref()).await
            }
            ToolCall::Click { selector } => self.click(&selector).await,
            ToolCall::ClickText { text } => self.click_text(&text).await,
            ToolCall::Fill { selector, value } => self.fill(&selector, &value).await,
            ToolCall::Evaluate { script } => self.evaluate(&script).await,
            ToolCall::GetTextContent => self.get_text_content().await,
            ToolCall::GetHtmlContent { selector } => self.get_html_content(&selector).await,
            ToolCall::ListPages => self.list_pages().await,
            ToolCall::SwitchToPage { index } => self.switch_to_page(index).await,
            ToolCall::Frame { name, selector } => self.frame(name, selector).await,
        }
    }

    /// Navigate the active page, creating a session first if none exists.
    async fn navigate(&self, url: &str) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.ensure_session().await?;
        let guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();
        drop(guard);

        let settled = executor::navigate(&page, url).await?;
        let preview = text_preview(page, frame).await;
        Ok(ToolResult::text(format!(
            "Navigated to {settled}\n{preview}"
        )))
    }

    async fn new_session(&self, url: Option<&str>) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.create_session().await?;
        let guard = session.lock().await;

        let mut message = format!("Created new browser session {}", guard.id);
        if let Some(url) = url {
            let page = guard.registry.active_page().clone();
            drop(guard);
            let settled = executor::navigate(&page, url).await?;
            message.push_str(&format!(", navigated to {settled}"));
        }
        Ok(ToolResult::text(message))
    }

    async fn screenshot(
        &self,
        name: &str,
        selector: Option<&str>,
    ) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        drop(guard);

        let png = executor::screenshot(&page, selector).await?;
        tracing::debug!(name, bytes = png.len(), "Captured screenshot");
        let encoded = general_purpose::STANDARD.encode(&png);
        Ok(ToolResult::png(encoded))
    }

    async fn click(&self, selector: &str) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let mut guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();

        guard
            .click_and_reconcile(executor::click(page, frame, selector))
            .await?;
        Ok(ToolResult::text(format!(
            "Clicked element with selector {selector}"
        )))
    }

    async fn click_text(&self, text: &str) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let mut guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();

        guard
            .click_and_reconcile(executor::click_by_text(page, frame, text))
            .await?;
        Ok(ToolResult::text(format!("Clicked element with text {text}")))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();
        drop(guard);

        executor::fill(page, frame, selector, value).await?;
        Ok(ToolResult::text(format!(
            "Filled element with selector {selector} with value {value}"
        )))
    }

    async fn evaluate(&self, script: &str) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();
        drop(guard);

        let value = executor::evaluate(page, frame, script).await?;
        Ok(ToolResult::text(format!(
            "Evaluated script, result: {value}"
        )))
    }

    async fn get_text_content(&self) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();
        drop(guard);

        let texts = executor::read_visible_text(page, frame).await?;
        Ok(ToolResult::text(format!(
            "Text content of all elements:\n{}",
            texts.join("\n")
        )))
    }

    async fn get_html_content(&self, selector: &str) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let guard = session.lock().await;
        let page = guard.registry.active_page().clone();
        let frame = guard.registry.frame().cloned();
        drop(guard);

        let html = executor::read_html(page, frame, selector).await?;
        Ok(ToolResult::text(format!(
            "HTML content of element with selector {selector}: {html}"
        )))
    }

    async fn list_pages(&self) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let guard = session.lock().await;

        let snapshot = guard.registry.snapshot(guard.browser()).await?;
        let lines: Vec<String> = snapshot
            .iter()
            .map(|(_, info)| {
                format!("Page {}: URL={}, Title={}", info.index, info.url, info.title)
            })
            .collect();
        Ok(ToolResult::text(format!(
            "Available pages:\n{}",
            lines.join("\n")
        )))
    }

    async fn switch_to_page(&self, index: usize) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let mut guard = session.lock().await;

        let info = guard.switch_to_page(index).await?;
        Ok(ToolResult::text(format!(
            "Switched to page {index}: URL={}, Title={}",
            info.url, info.title
        )))
    }

    /// Set, replace, or reset the frame override. The override is validated
    /// against the live page before it is stored, so a bad name or selector
    /// fails here instead of poisoning every later call.
    async fn frame(
        &self,
        name: Option<String>,
        selector: Option<String>,
    ) -> Result<ToolResult, BrowserError> {
        let session = self.sessions.active_session().await?;
        let mut guard = session.lock().await;
        let page = guard.registry.active_page().clone();

        let frame = match (name, selector) {
            (Some(name), _) => Some(FrameSelector::ByName(name)),
            (None, Some(selector)) => Some(FrameSelector::BySelector(selector)),
            (None, None) => None,
        };

        match frame {
            Some(frame) => {
                executor::probe_frame(&page, &frame).await?;
                let message = format!("Switched to frame {}", frame.describe());
                guard.registry.set_frame(frame);
                Ok(ToolResult::text(message))
            }
            None => {
                guard.registry.clear_frame();
                Ok(ToolResult::text("Reset to main frame"))
            }
        }
    }
}

/// Best-effort visible-text preview for navigate results; never turns a
/// successful navigation into an error.
async fn text_preview(page: chromiumoxide::Page, frame: Option<FrameSelector>) -> String {
    match executor::read_visible_text(page, frame).await {
        Ok(texts) => {
            let blob = texts.join("\n");
            let preview: String = blob.chars().take(NAVIGATE_PREVIEW_CHARS).collect();
            format!("page_text_content[:{NAVIGATE_PREVIEW_CHARS}]:\n\n{preview}")
        }
        Err(e) => {
            tracing::debug!(error = %e, "Text preview after navigate failed");
            String::new()
        }
    }
}
