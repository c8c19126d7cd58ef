use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::{FrameTree, GetFrameTreeParams};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::browser::{
    BrowserError, BrowserLauncher, BrowserSession, BrowsingContext, CapturedResponse, FrameInfo,
    FrameRef, NavigateOptions, PageHandle, ResourceType, ResponseCapture, WaitUntil,
};
use crate::cli::config::BrowserSettings;

/// How long the drain loop waits for one more buffered event before stopping
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Upper bound for one drain, for pages that never stop sending responses
const DRAIN_LIMIT: Duration = Duration::from_secs(3);

/// Extra quiet time granted to `WaitUntil::NetworkIdle` navigations
const NETWORK_IDLE_GRACE: Duration = Duration::from_millis(500);

/// Lists iframe elements with the best title we can read from the parent document
const IFRAME_TITLES_SCRIPT: &str = r#"Array.from(document.querySelectorAll('iframe')).map(function (f) {
    var t = '';
    try { t = f.contentDocument ? f.contentDocument.title : ''; } catch (e) {}
    return { src: f.src || '', name: f.name || '', title: t || f.getAttribute('title') || '' };
})"#;

fn protocol<E: std::fmt::Display>(e: E) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

/// Attribute a response to a frame from its CDP frame id
fn frame_ref(frame_id: Option<&str>, main_frame: Option<&str>, frame_urls: &HashMap<String, String>) -> FrameRef {
    match frame_id {
        None => FrameRef::Unattributed,
        Some(id) if main_frame == Some(id) => FrameRef::Main,
        Some(id) => match frame_urls.get(id) {
            Some(url) => FrameRef::Child {
                id: id.to_string(),
                url: url.clone(),
            },
            None => FrameRef::Detached,
        },
    }
}

/// Feed buffered items to `on_item` until the stream stays quiet for `poll`
/// or `limit` has elapsed. Returns how many items were handled.
async fn drain_events<S, F>(stream: &mut S, poll: Duration, limit: Duration, mut on_item: F) -> usize
where
    S: Stream + Unpin,
    F: FnMut(S::Item),
{
    let deadline = Instant::now() + limit;
    let mut handled = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("Response drain hit its {}ms limit", limit.as_millis());
            break;
        }

        match tokio::time::timeout(poll.min(remaining), stream.next()).await {
            Ok(Some(item)) => {
                on_item(item);
                handled += 1;
            }
            Ok(None) | Err(_) => break,
        }
    }

    handled
}

/// Launches headless Chrome/Chromium over the DevTools protocol
pub struct ChromeLauncher {
    /// Browser settings
    config: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(config: BrowserSettings) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(self.config.request_timeout_ms))
            .window_size(self.config.viewport.width, self.config.viewport.height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");

        // Headless unless explicitly disabled
        if !self.config.headless {
            builder = builder.with_head();
        }

        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }

        if let Some(path) = &self.config.executable {
            builder = builder.chrome_executable(path);
        }

        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.arg(format!("--user-agent={}", user_agent));
        }

        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler drives the websocket connection and must be polled for
        // as long as the browser is in use
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        info!("Browser session launched (headless: {})", self.config.headless);

        Ok(Box::new(ChromeSession {
            browser: Arc::new(Mutex::new(Some(browser))),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
        }))
    }
}

/// A running Chrome process
pub struct ChromeSession {
    /// Browser instance, `None` once closed
    browser: Arc<Mutex<Option<Browser>>>,

    /// Task polling the DevTools connection
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;

        let response = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(protocol)?;
        let id = response.result.browser_context_id.clone();

        debug!("Created browser context: {:?}", id);

        Ok(Box::new(ChromeContext {
            browser: self.browser.clone(),
            id,
        }))
    }

    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError> {
        let page = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
            browser.new_page("about:blank").await.map_err(protocol)?
        };

        Ok(Box::new(ChromePage::open(page).await?))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let browser = self.browser.lock().await.take();

        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ()).map_err(protocol);
                if let Err(e) = browser.wait().await {
                    debug!("Error waiting for browser process: {}", e);
                }
                closed
            }
            None => Ok(()),
        };

        if let Ok(mut handler) = self.handler_task.lock() {
            if let Some(task) = handler.take() {
                task.abort();
            }
        }

        debug!("Browser session closed");
        result
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        let browser = match self.browser.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(mut browser) = browser {
            // Spawn a task to close the browser if nobody did it explicitly
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = browser.close().await {
                        error!("Error closing browser session during drop: {}", e);
                    }
                    let _ = browser.wait().await;
                });
            }
        }
    }
}

/// An incognito-style browser context
pub struct ChromeContext {
    browser: Arc<Mutex<Option<Browser>>>,
    id: BrowserContextId,
}

#[async_trait]
impl BrowsingContext for ChromeContext {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(BrowserError::Protocol)?;

        let page = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
            browser.new_page(params).await.map_err(protocol)?
        };

        Ok(Box::new(ChromePage::open(page).await?))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;

        browser
            .execute(DisposeBrowserContextParams::new(self.id.clone()))
            .await
            .map_err(protocol)?;

        debug!("Disposed browser context: {:?}", self.id);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IframeElement {
    src: String,
    name: String,
    title: String,
}

/// A tab with a live response subscription
pub struct ChromePage {
    page: Page,

    /// Subscribed before the first navigation so early responses are not lost
    events: Mutex<EventStream<EventResponseReceived>>,
}

impl ChromePage {
    async fn open(page: Page) -> Result<Self, BrowserError> {
        page.execute(EnableParams::default()).await.map_err(protocol)?;
        let events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(protocol)?;

        Ok(Self {
            page,
            events: Mutex::new(events),
        })
    }

    async fn frame_tree(&self) -> Result<FrameTree, BrowserError> {
        let response = self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(protocol)?;
        Ok(response.result.frame_tree.clone())
    }

    fn flatten(tree: &FrameTree, parent: Option<&str>, out: &mut Vec<FrameInfo>) {
        let id = tree.frame.id.inner().clone();
        out.push(FrameInfo {
            id: id.clone(),
            parent_id: parent.map(str::to_string),
            url: tree.frame.url.clone(),
            name: tree.frame.name.clone().unwrap_or_default(),
            title: String::new(),
        });

        if let Some(children) = &tree.child_frames {
            for child in children {
                Self::flatten(child, Some(&id), out);
            }
        }
    }

    /// Move buffered response events into `capture`.
    /// Returns the status of the last main-frame document response seen.
    async fn collect(&self, capture: &mut ResponseCapture) -> Result<Option<u16>, BrowserError> {
        let main_frame = self.page.mainframe().await.map_err(protocol)?;

        // Child frame URLs as they are now; responses only carry frame ids
        let mut frame_urls = HashMap::new();
        if let Ok(tree) = self.frame_tree().await {
            let mut frames = Vec::new();
            Self::flatten(&tree, None, &mut frames);
            for frame in frames {
                frame_urls.insert(frame.id, frame.url);
            }
        }

        let mut events = self.events.lock().await;
        let mut main_status = None;

        let drained = drain_events(&mut *events, DRAIN_POLL, DRAIN_LIMIT, |event| {
            let frame = frame_ref(
                event.frame_id.as_ref().map(|id| id.inner().as_str()),
                main_frame.as_ref().map(|id| id.inner().as_str()),
                &frame_urls,
            );

            let resource_type = ResourceType::from_cdp_name(&format!("{:?}", event.r#type));
            let status = u16::try_from(event.response.status).unwrap_or(0);

            if frame.is_main() && resource_type == ResourceType::Document {
                main_status = Some(status);
            }

            let mime = event.response.mime_type.clone();
            capture.record(CapturedResponse {
                request_id: event.request_id.inner().clone(),
                url: event.response.url.clone(),
                status,
                resource_type,
                frame,
                content_type: if mime.is_empty() { None } else { Some(mime) },
            });
        })
        .await;
        debug!("Drained {} response events", drained);

        Ok(main_status)
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn goto(
        &self,
        url: &str,
        options: &NavigateOptions,
        capture: &mut ResponseCapture,
    ) -> Result<Option<u16>, BrowserError> {
        debug!("Navigating to: {}", url);

        let navigation = tokio::time::timeout(options.timeout, self.page.goto(url)).await;

        let settle = match options.wait_until {
            WaitUntil::NetworkIdle => options.settle + NETWORK_IDLE_GRACE,
            WaitUntil::DomContentLoaded | WaitUntil::Load => options.settle,
        };
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        // Collect even when navigation failed; partial loads still report responses
        let collected = self.collect(capture).await;

        match navigation {
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
                timeout_ms: options.timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Ok(Ok(_)) => collected,
        }
    }

    async fn drain_responses(&self, capture: &mut ResponseCapture, settle: Duration) -> Result<(), BrowserError> {
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        self.collect(capture).await.map(|_| ())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page.content().await.map_err(protocol)
    }

    async fn title(&self) -> Result<Option<String>, BrowserError> {
        self.page.get_title().await.map_err(protocol)
    }

    async fn url(&self) -> Result<Option<String>, BrowserError> {
        self.page.url().await.map_err(protocol)
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, BrowserError> {
        let tree = self.frame_tree().await?;
        let mut frames = Vec::new();
        Self::flatten(&tree, None, &mut frames);

        // Titles are not part of the frame tree; read them from the iframe elements
        let elements: Vec<IframeElement> = self
            .evaluate(IFRAME_TITLES_SCRIPT)
            .await
            .ok()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        for frame in frames.iter_mut().filter(|f| !f.is_main()) {
            let element = elements.iter().find(|e| {
                (!frame.name.is_empty() && e.name == frame.name) || e.src == frame.url
            });
            if let Some(element) = element {
                frame.title = element.title.clone();
            }
        }

        Ok(frames)
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, BrowserError> {
        let result = self.page.evaluate(expression).await.map_err(protocol)?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn response_body(&self, response: &CapturedResponse) -> Result<Vec<u8>, BrowserError> {
        let params = GetResponseBodyParams::new(RequestId::new(response.request_id.clone()));
        let body = self.page.execute(params).await.map_err(protocol)?;

        if body.result.base64_encoded {
            STANDARD.decode(&body.result.body).map_err(protocol)
        } else {
            Ok(body.result.body.clone().into_bytes())
        }
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page.clone().close().await.map_err(protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_frame_ref_attribution() {
        let frame_urls = HashMap::from([("child".to_string(), "https://ads.example.com/".to_string())]);

        assert_eq!(frame_ref(Some("main"), Some("main"), &frame_urls), FrameRef::Main);
        assert_eq!(
            frame_ref(Some("child"), Some("main"), &frame_urls),
            FrameRef::Child { id: "child".to_string(), url: "https://ads.example.com/".to_string() }
        );
        assert_eq!(frame_ref(Some("gone"), Some("main"), &frame_urls), FrameRef::Detached);
        assert_eq!(frame_ref(None, Some("main"), &frame_urls), FrameRef::Unattributed);
    }

    #[tokio::test]
    async fn test_drain_stops_when_quiet() {
        let mut events = stream::iter(vec![1, 2, 3]).chain(stream::pending());
        let mut seen = Vec::new();

        let handled = drain_events(&mut events, Duration::from_millis(20), Duration::from_secs(5), |e| seen.push(e)).await;

        assert_eq!(handled, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_drain_is_bounded_for_endless_streams() {
        let mut events = Box::pin(stream::repeat(()).then(|_| tokio::time::sleep(Duration::from_millis(5))));
        let started = Instant::now();

        let handled = drain_events(&mut events, Duration::from_millis(50), Duration::from_millis(200), |_| {}).await;

        assert!(handled > 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
