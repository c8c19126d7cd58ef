use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use crate::browser::{BrowserError, ResourceType};

/// Which frame a response was delivered to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FrameRef {
    Main,
    Child { id: String, url: String },
    /// Sent from a child frame that was gone by the time the response was drained
    Detached,
    /// Not sent by any frame (service workers, shared workers)
    Unattributed,
}

impl FrameRef {
    pub fn is_main(&self) -> bool {
        matches!(self, FrameRef::Main)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            FrameRef::Child { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// One network response observed during a page load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    /// Browser-assigned identifier, used to fetch the body later
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub resource_type: ResourceType,
    pub frame: FrameRef,
    pub content_type: Option<String>,
}

impl CapturedResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }
}

/// Collector handed to a navigation; owns the responses it receives
#[derive(Debug, Default)]
pub struct ResponseCapture {
    responses: Vec<CapturedResponse>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, response: CapturedResponse) {
        debug!(
            "Captured {} {} ({:?}, main frame: {})",
            response.status,
            response.url,
            response.resource_type,
            response.frame.is_main()
        );
        self.responses.push(response);
    }

    pub fn responses(&self) -> &[CapturedResponse] {
        &self.responses
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Hand over everything recorded so far, in emission order
    pub fn take(&mut self) -> Vec<CapturedResponse> {
        std::mem::take(&mut self.responses)
    }
}

/// Await a close operation, logging instead of propagating its failure
pub async fn release<F>(what: &str, close: F)
where
    F: Future<Output = Result<(), BrowserError>>,
{
    match close.await {
        Ok(()) => debug!("Released {}", what),
        Err(e) => warn!("Failed to release {}: {}", what, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str, content_type: Option<&str>) -> CapturedResponse {
        CapturedResponse {
            request_id: "1".to_string(),
            url: url.to_string(),
            status: 200,
            resource_type: ResourceType::Document,
            frame: FrameRef::Main,
            content_type: content_type.map(str::to_string),
        }
    }

    #[test]
    fn test_capture_take_preserves_order() {
        let mut capture = ResponseCapture::new();
        capture.record(response("https://example.com/a", None));
        capture.record(response("https://example.com/b", None));
        assert_eq!(capture.len(), 2);

        let taken = capture.take();
        assert_eq!(taken[0].url, "https://example.com/a");
        assert_eq!(taken[1].url, "https://example.com/b");
        assert!(capture.is_empty());
    }

    #[test]
    fn test_is_html() {
        assert!(response("https://a", Some("text/html; charset=utf-8")).is_html());
        assert!(response("https://a", Some("Text/HTML")).is_html());
        assert!(!response("https://a", Some("image/png")).is_html());
        assert!(!response("https://a", None).is_html());
    }

    #[tokio::test]
    async fn test_release_swallows_errors() {
        release("page", async { Err(BrowserError::Closed) }).await;
        release("page", async { Ok(()) }).await;
    }
}
