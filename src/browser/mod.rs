pub mod capture;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// Re-export common types
pub use capture::{release, CapturedResponse, FrameRef, ResponseCapture};
pub use session::ChromeLauncher;

/// Failures raised by the browser-automation layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Browser resource already closed")]
    Closed,
}

/// Load milestone a navigation waits for before it is considered settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// Options for a single navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigateOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
    /// Extra time to keep listening for responses once the page has loaded
    pub settle: Duration,
}

impl NavigateOptions {
    pub fn new(wait_until: WaitUntil, timeout_ms: u64, settle_ms: u64) -> Self {
        Self {
            wait_until,
            timeout: Duration::from_millis(timeout_ms),
            settle: Duration::from_millis(settle_ms),
        }
    }
}

/// Kind of resource a network response carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Fetch,
    WebSocket,
    Manifest,
    Other,
}

impl ResourceType {
    /// Map a DevTools resource type name (`"Document"`, `"XHR"`, ...) to a variant
    pub fn from_cdp_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "stylesheet" => Self::Stylesheet,
            "image" => Self::Image,
            "media" => Self::Media,
            "font" => Self::Font,
            "script" => Self::Script,
            "xhr" => Self::Xhr,
            "fetch" => Self::Fetch,
            "websocket" => Self::WebSocket,
            "manifest" => Self::Manifest,
            _ => Self::Other,
        }
    }
}

/// A frame attached to a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub id: String,
    /// `None` for the main frame
    pub parent_id: Option<String>,
    pub url: String,
    pub name: String,
    pub title: String,
}

impl FrameInfo {
    pub fn is_main(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Starts isolated browser processes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// A running browser process
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Create an isolated browsing context (separate cookies and cache)
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, BrowserError>;

    /// Open a page in the default context
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// An isolated browsing context inside a session
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// A single tab
///
/// A page listens for network responses from the moment it is opened.
/// Responses are handed to the caller only through an explicit
/// [`ResponseCapture`], either at the end of [`PageHandle::goto`] or on a
/// later [`PageHandle::drain_responses`].
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait for the configured milestone plus the settle window.
    /// Every response observed meanwhile is recorded into `capture`, even when
    /// the navigation itself fails. Returns the main document status, if any.
    async fn goto(
        &self,
        url: &str,
        options: &NavigateOptions,
        capture: &mut ResponseCapture,
    ) -> Result<Option<u16>, BrowserError>;

    /// Wait `settle`, then move responses observed since the last drain into `capture`
    async fn drain_responses(&self, capture: &mut ResponseCapture, settle: Duration) -> Result<(), BrowserError>;

    /// Serialized DOM of the main frame
    async fn content(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<Option<String>, BrowserError>;

    async fn url(&self) -> Result<Option<String>, BrowserError>;

    /// Every frame of the page, main frame included
    async fn frames(&self) -> Result<Vec<FrameInfo>, BrowserError>;

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, BrowserError>;

    /// Body of a response recorded by this page
    async fn response_body(&self, response: &CapturedResponse) -> Result<Vec<u8>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}
