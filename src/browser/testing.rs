//! Scripted in-memory browser used by the unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{
    BrowserError, BrowserLauncher, BrowserSession, BrowsingContext, CapturedResponse, FrameInfo,
    FrameRef, NavigateOptions, PageHandle, ResourceType, ResponseCapture,
};

/// A response served alongside a document
#[derive(Debug, Clone)]
pub struct FakeResponse {
    pub url: String,
    pub status: u16,
    pub resource_type: ResourceType,
    pub frame: FrameRef,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FakeResponse {
    pub fn new(url: &str, status: u16, resource_type: ResourceType) -> Self {
        Self {
            url: url.to_string(),
            status,
            resource_type,
            frame: FrameRef::Main,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn in_frame(mut self, frame_url: &str) -> Self {
        self.frame = FrameRef::Child {
            id: format!("frame:{}", frame_url),
            url: frame_url.to_string(),
        };
        self
    }

    pub fn html(mut self, body: &str) -> Self {
        self.content_type = Some("text/html; charset=utf-8".to_string());
        self.body = body.as_bytes().to_vec();
        self
    }

    pub fn bytes(mut self, content_type: &str, body: &[u8]) -> Self {
        self.content_type = Some(content_type.to_string());
        self.body = body.to_vec();
        self
    }
}

/// What navigating to one URL produces
#[derive(Debug, Clone, Default)]
pub struct FakeDocument {
    /// `None` makes the navigation itself fail
    pub status: Option<u16>,
    pub body: String,
    pub title: Option<String>,
    pub subresources: Vec<FakeResponse>,
    /// Only observed on a drain after the navigation, e.g. after scrolling
    pub late_subresources: Vec<FakeResponse>,
    pub frames: Vec<FrameInfo>,
}

impl FakeDocument {
    pub fn html(status: u16, body: &str) -> Self {
        Self {
            status: Some(status),
            body: body.to_string(),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_subresource(mut self, response: FakeResponse) -> Self {
        self.subresources.push(response);
        self
    }

    pub fn with_late_subresource(mut self, response: FakeResponse) -> Self {
        self.late_subresources.push(response);
        self
    }

    pub fn with_frame(mut self, url: &str, name: &str, title: &str) -> Self {
        self.frames.push(FrameInfo {
            id: format!("frame:{}", url),
            parent_id: Some("main".to_string()),
            url: url.to_string(),
            name: name.to_string(),
            title: title.to_string(),
        });
        self
    }
}

/// URL → document table shared by every page of a fake browser
#[derive(Debug, Clone, Default)]
pub struct FakeWeb {
    documents: Arc<Mutex<HashMap<String, FakeDocument>>>,
}

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, document: FakeDocument) -> Self {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(url.to_string(), document);
        }
        self
    }

    fn get(&self, url: &str) -> Option<FakeDocument> {
        let documents = self.documents.lock().ok()?;
        let trimmed = url.trim_end_matches('/');
        documents
            .get(url)
            .or_else(|| documents.get(trimmed))
            .or_else(|| documents.get(&format!("{}/", trimmed)))
            .cloned()
    }
}

/// Counters for resources opened and released
#[derive(Debug, Default)]
pub struct FakeStats {
    pub launches: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub contexts_opened: AtomicUsize,
    pub contexts_closed: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
}

impl FakeStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Every page, context and session opened was also closed
    pub fn all_released(&self) -> bool {
        Self::get(&self.pages_opened) == Self::get(&self.pages_closed)
            && Self::get(&self.contexts_opened) == Self::get(&self.contexts_closed)
            && Self::get(&self.launches) == Self::get(&self.sessions_closed)
    }

    pub fn navigated(&self) -> Vec<String> {
        self.navigations.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

pub struct FakeLauncher {
    web: FakeWeb,
    pub stats: Arc<FakeStats>,
}

impl FakeLauncher {
    pub fn new(web: FakeWeb) -> Self {
        Self {
            web,
            stats: Arc::new(FakeStats::default()),
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            web: self.web.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct FakeSession {
    web: FakeWeb,
    stats: Arc<FakeStats>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, BrowserError> {
        self.stats.contexts_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            web: self.web.clone(),
            stats: self.stats.clone(),
        }))
    }

    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError> {
        Ok(Box::new(FakePage::new(self.web.clone(), self.stats.clone())))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.stats.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeContext {
    web: FakeWeb,
    stats: Arc<FakeStats>,
}

#[async_trait]
impl BrowsingContext for FakeContext {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError> {
        Ok(Box::new(FakePage::new(self.web.clone(), self.stats.clone())))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.stats.contexts_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct PageState {
    url: Option<String>,
    document: Option<FakeDocument>,
    pending: Vec<FakeResponse>,
    bodies: HashMap<String, Vec<u8>>,
    next_id: usize,
}

impl PageState {
    fn record(&mut self, capture: &mut ResponseCapture, response: FakeResponse) {
        self.next_id += 1;
        let request_id = format!("req-{}", self.next_id);
        self.bodies.insert(request_id.clone(), response.body);
        capture.record(CapturedResponse {
            request_id,
            url: response.url,
            status: response.status,
            resource_type: response.resource_type,
            frame: response.frame,
            content_type: response.content_type,
        });
    }
}

struct FakePage {
    web: FakeWeb,
    stats: Arc<FakeStats>,
    state: Mutex<PageState>,
}

impl FakePage {
    fn new(web: FakeWeb, stats: Arc<FakeStats>) -> Self {
        stats.pages_opened.fetch_add(1, Ordering::SeqCst);
        Self {
            web,
            stats,
            state: Mutex::new(PageState::default()),
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, PageState>, BrowserError> {
        self.state
            .lock()
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl PageHandle for FakePage {
    async fn goto(
        &self,
        url: &str,
        _options: &NavigateOptions,
        capture: &mut ResponseCapture,
    ) -> Result<Option<u16>, BrowserError> {
        if let Ok(mut navigations) = self.stats.navigations.lock() {
            navigations.push(url.to_string());
        }

        let document = self.web.get(url);
        let mut state = self.state()?;

        let Some(document) = document else {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        };
        let Some(status) = document.status else {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        };

        let main = FakeResponse::new(url, status, ResourceType::Document).html(&document.body);
        state.record(capture, main);
        for response in document.subresources.iter().cloned() {
            state.record(capture, response);
        }

        state.pending = document.late_subresources.clone();
        state.url = Some(url.to_string());
        state.document = Some(document);

        Ok(Some(status))
    }

    async fn drain_responses(&self, capture: &mut ResponseCapture, _settle: Duration) -> Result<(), BrowserError> {
        let mut state = self.state()?;
        let pending = std::mem::take(&mut state.pending);
        for response in pending {
            state.record(capture, response);
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let state = self.state()?;
        Ok(state
            .document
            .as_ref()
            .map(|d| d.body.clone())
            .unwrap_or_else(|| "<html><head></head><body></body></html>".to_string()))
    }

    async fn title(&self) -> Result<Option<String>, BrowserError> {
        Ok(self.state()?.document.as_ref().and_then(|d| d.title.clone()))
    }

    async fn url(&self) -> Result<Option<String>, BrowserError> {
        Ok(self.state()?.url.clone())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, BrowserError> {
        let state = self.state()?;
        let mut frames = vec![FrameInfo {
            id: "main".to_string(),
            parent_id: None,
            url: state.url.clone().unwrap_or_else(|| "about:blank".to_string()),
            name: String::new(),
            title: String::new(),
        }];
        if let Some(document) = &state.document {
            frames.extend(document.frames.iter().cloned());
        }
        Ok(frames)
    }

    async fn evaluate(&self, _expression: &str) -> Result<serde_json::Value, BrowserError> {
        // Scroll scripts report "reached the bottom"
        Ok(serde_json::Value::Bool(true))
    }

    async fn response_body(&self, response: &CapturedResponse) -> Result<Vec<u8>, BrowserError> {
        self.state()?
            .bodies
            .get(&response.request_id)
            .cloned()
            .ok_or_else(|| BrowserError::Protocol("No resource with given identifier found".to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.stats.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
