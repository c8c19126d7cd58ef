use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::audit::fingerprint::{
    duplicate_groups, merge_index, strip_cache_busting, ContentFingerprinter, DuplicateGroup, FingerprintIndex,
};
use crate::audit::AuditTarget;
use crate::browser::{
    release, BrowserLauncher, BrowsingContext, NavigateOptions, PageHandle, ResponseCapture, WaitUntil,
};
use crate::cli::config::DuplicateSettings;
use crate::error::Result;

/// Scrolls one viewport and reports whether the bottom was reached
const SCROLL_STEP_SCRIPT: &str =
    "(function () { window.scrollBy(0, window.innerHeight || 800); return (window.innerHeight + window.scrollY) >= document.body.scrollHeight; })()";

const MAX_SCROLL_STEPS: usize = 40;
const SCROLL_STEP_PAUSE: Duration = Duration::from_millis(150);

/// Duplicate content found while loading one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateResult {
    pub url: String,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub groups: Vec<DuplicateGroup>,
    /// Every URL that appears in one of `groups`
    pub duplicates: Vec<String>,
    pub responses_seen: usize,
    pub iframe_sources: Vec<String>,
    /// Number of distinct fingerprints
    pub hashed_group_count: usize,
}

impl DuplicateResult {
    fn failed(url: &str, message: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            error: true,
            error_message: Some(message.into()),
            groups: Vec::new(),
            duplicates: Vec::new(),
            responses_seen: 0,
            iframe_sources: Vec::new(),
            hashed_group_count: 0,
        }
    }
}

/// Outcome of a duplicate scan over a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    /// Groups over the union of every target's fingerprints
    pub groups: Vec<DuplicateGroup>,
    pub results: Vec<DuplicateResult>,
}

/// Duplicate groups across every scanned target, merged by hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSummary {
    pub detected: bool,
    /// Distinct URLs involved in any duplicate group
    pub items_count: usize,
    pub cross_page_duplicates: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    pub fn summary(&self) -> DuplicateSummary {
        let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let all_groups = self
            .groups
            .iter()
            .chain(self.results.iter().flat_map(|result| result.groups.iter()));
        for group in all_groups {
            merged.entry(group.hash.clone()).or_default().extend(group.urls.iter().cloned());
        }

        let cross_page_duplicates = duplicate_groups(&merged);
        let items: HashSet<&String> = cross_page_duplicates.iter().flat_map(|g| g.urls.iter()).collect();

        DuplicateSummary {
            detected: !cross_page_duplicates.is_empty(),
            items_count: items.len(),
            cross_page_duplicates,
        }
    }
}

/// Finds responses serving identical content behind different URLs
pub struct DuplicateDetector {
    config: DuplicateSettings,
}

impl DuplicateDetector {
    pub fn new(config: DuplicateSettings) -> Self {
        Self { config }
    }

    /// Scan every target in one browser context.
    /// Only a browser that cannot be launched fails the whole batch.
    pub async fn run(&self, launcher: &dyn BrowserLauncher, targets: &[AuditTarget]) -> Result<DuplicateReport> {
        let hosts: HashSet<String> = targets.iter().filter_map(AuditTarget::host).collect();
        info!("Scanning {} targets for duplicate content (hosts: {:?})", targets.len(), hosts);

        let session = launcher.launch().await?;
        let context = match session.new_context().await {
            Ok(context) => context,
            Err(e) => {
                release("duplicate browser session", session.close()).await;
                return Err(e.into());
            }
        };

        let mut batch_index = FingerprintIndex::new();
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let (result, index) = self.scan_target(context.as_ref(), target, &hosts).await;
            merge_index(&mut batch_index, &index);
            results.push(result);
        }

        release("duplicate browser context", context.close()).await;
        release("duplicate browser session", session.close()).await;

        Ok(DuplicateReport {
            groups: duplicate_groups(&batch_index),
            results,
        })
    }

    async fn scan_target(
        &self,
        context: &dyn BrowsingContext,
        target: &AuditTarget,
        hosts: &HashSet<String>,
    ) -> (DuplicateResult, FingerprintIndex) {
        let url = target.as_str();
        let mut fingerprinter = ContentFingerprinter::new(hosts.clone(), self.config.max_body_bytes);

        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => return (DuplicateResult::failed(url, e.to_string()), FingerprintIndex::new()),
        };

        let loaded = self.scan_main_page(page.as_ref(), target, &mut fingerprinter).await;
        release("duplicate page", page.close()).await;

        let iframe_sources = match loaded {
            Ok(sources) => sources,
            Err(message) => {
                warn!("Duplicate scan of {} failed: {}", url, message);
                return (DuplicateResult::failed(url, message), FingerprintIndex::new());
            }
        };

        for source in &iframe_sources {
            self.scan_frame(context, source, &mut fingerprinter).await;
        }

        let groups = fingerprinter.groups();
        let duplicates: BTreeSet<String> = groups.iter().flat_map(|g| g.urls.iter().cloned()).collect();

        debug!(
            "{}: {} responses, {} fingerprints, {} groups",
            url,
            fingerprinter.responses_seen(),
            fingerprinter.fingerprint_count(),
            groups.len()
        );

        let result = DuplicateResult {
            url: url.to_string(),
            error: false,
            error_message: None,
            groups,
            duplicates: duplicates.into_iter().collect(),
            responses_seen: fingerprinter.responses_seen(),
            iframe_sources,
            hashed_group_count: fingerprinter.fingerprint_count(),
        };
        (result, fingerprinter.index().clone())
    }

    /// Load the target, scroll it and fingerprint what arrived; returns the iframe sources to visit next
    async fn scan_main_page(
        &self,
        page: &dyn PageHandle,
        target: &AuditTarget,
        fingerprinter: &mut ContentFingerprinter,
    ) -> std::result::Result<Vec<String>, String> {
        let options = NavigateOptions::new(
            WaitUntil::NetworkIdle,
            self.config.navigation_timeout_ms,
            self.config.settle_ms,
        );
        let mut capture = ResponseCapture::new();

        page.goto(target.as_str(), &options, &mut capture)
            .await
            .map_err(|e| e.to_string())?;

        // Lazy-loaded content only shows up once scrolled into view
        self.auto_scroll(page).await;
        if let Err(e) = page
            .drain_responses(&mut capture, Duration::from_millis(self.config.scroll_settle_ms))
            .await
        {
            debug!("Could not drain responses after scrolling {}: {}", target.as_str(), e);
        }

        fingerprinter.ingest(page, capture.take()).await;

        let html = page.content().await.unwrap_or_default();
        Ok(iframe_sources(&html, &target.url, self.config.max_frames))
    }

    async fn auto_scroll(&self, page: &dyn PageHandle) {
        for _ in 0..MAX_SCROLL_STEPS {
            match page.evaluate(SCROLL_STEP_SCRIPT).await {
                Ok(serde_json::Value::Bool(false)) => tokio::time::sleep(SCROLL_STEP_PAUSE).await,
                Ok(_) => break,
                Err(e) => {
                    debug!("Scrolling stopped: {}", e);
                    break;
                }
            }
        }
    }

    async fn scan_frame(&self, context: &dyn BrowsingContext, source: &str, fingerprinter: &mut ContentFingerprinter) {
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("Could not open page for frame {}: {}", source, e);
                return;
            }
        };

        let options = NavigateOptions::new(
            WaitUntil::NetworkIdle,
            self.config.frame_timeout_ms,
            self.config.frame_settle_ms,
        );
        let mut capture = ResponseCapture::new();

        match page.goto(source, &options, &mut capture).await {
            Ok(_) => fingerprinter.ingest(page.as_ref(), capture.take()).await,
            Err(e) => warn!("Frame {} failed to load: {}", source, e),
        }

        release("duplicate frame page", page.close()).await;
    }
}

/// First `limit` distinct http(s) iframe sources, resolved and without cache busters
pub fn iframe_sources(html: &str, base: &Url, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("iframe[src]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let mut sources = Vec::new();
    for iframe in document.select(&selector) {
        if sources.len() >= limit {
            break;
        }
        let Some(src) = iframe.value().attr("src") else { continue };
        let Ok(resolved) = base.join(src.trim()) else { continue };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }

        let cleaned = strip_cache_busting(resolved.as_str());
        if !sources.contains(&cleaned) {
            sources.push(cleaned);
        }
    }
    sources
}
