pub mod duplicate;
pub mod fingerprint;
pub mod reachability;
pub mod seo;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};
use url::Url;
use uuid::Uuid;

use crate::browser::{BrowserLauncher, ChromeLauncher};
use crate::cli::config::AuditConfig;
use crate::crawler::{BoundedCrawler, CrawlNode};
use crate::error::{AuditError, CheckFailure, Result};
use crate::utils::urls::parse_target;

// Re-export common types
pub use duplicate::{DuplicateDetector, DuplicateReport, DuplicateResult, DuplicateSummary};
pub use fingerprint::{ContentFingerprinter, DuplicateGroup};
pub use reachability::{ReachabilityChecker, ReachabilityReport, ReachabilityResult};
pub use seo::{SeoAnalyzer, SeoResult, SeoSnapshot};

/// A URL submitted for auditing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTarget {
    pub url: Url,
    pub category: Option<String>,
}

impl AuditTarget {
    /// Parse a raw target, prefixing `https://` when no scheme is given
    pub fn parse(raw: &str) -> Result<Self> {
        let url = parse_target(raw)
            .ok_or_else(|| AuditError::InvalidInput(format!("Invalid URL: {:?}", raw)))?;
        Ok(Self { url, category: None })
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Lowercase host name
    pub fn host(&self) -> Option<String> {
        self.url.host_str().map(str::to_lowercase)
    }
}

/// Which analyzers to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checks {
    pub check404: bool,
    pub duplicate: bool,
    pub seo: bool,
    pub all: bool,
}

impl Checks {
    pub fn everything() -> Self {
        Self {
            check404: true,
            duplicate: true,
            seo: true,
            all: true,
        }
    }

    /// `all` switches every individual check on
    pub fn normalized(self) -> Self {
        if self.all {
            Self::everything()
        } else {
            self
        }
    }

    pub fn any(&self) -> bool {
        let checks = self.normalized();
        checks.check404 || checks.duplicate || checks.seo
    }
}

/// A `{urls, checks}` request as received from an API caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRequest {
    pub urls: Vec<String>,
    pub checks: Checks,
}

impl AuditRequest {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let urls = value
            .get("urls")
            .ok_or_else(|| AuditError::InvalidInput("Missing 'urls' field".to_string()))?
            .as_array()
            .ok_or_else(|| AuditError::InvalidInput("'urls' must be an array".to_string()))?;

        if urls.is_empty() {
            return Err(AuditError::InvalidInput("'urls' must not be empty".to_string()));
        }

        let urls = urls
            .iter()
            .map(|url| {
                url.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AuditError::InvalidInput(format!("URL entries must be strings, got {}", url)))
            })
            .collect::<Result<Vec<_>>>()?;

        let checks = match value.get("checks") {
            Some(checks) => serde_json::from_value(checks.clone())
                .map_err(|e| AuditError::InvalidInput(format!("Invalid 'checks': {}", e)))?,
            None => Checks::default(),
        };

        Ok(Self { urls, checks })
    }
}

/// Result of one analyzer, or the failure that stopped it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckOutcome<T> {
    Failed(CheckFailure),
    Completed(T),
}

impl<T> CheckOutcome<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            CheckOutcome::Completed(value) => Some(value),
            CheckOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CheckOutcome::Failed(_))
    }
}

/// Requested checks of one batch; absent fields were not requested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check404: Option<CheckOutcome<ReachabilityReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<CheckOutcome<DuplicateReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo: Option<CheckOutcome<Vec<SeoResult>>>,
}

impl CheckResults {
    /// Cross-page summary of the duplicate check, when it ran to completion
    pub fn duplicate_summary(&self) -> Option<DuplicateSummary> {
        self.duplicate
            .as_ref()
            .and_then(CheckOutcome::completed)
            .map(DuplicateReport::summary)
    }
}

/// Analyzer results attached to one crawled page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check404: Option<CheckOutcome<ReachabilityResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<CheckOutcome<DuplicateResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo: Option<CheckOutcome<SeoResult>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedNode {
    #[serde(flatten)]
    pub node: CrawlNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<NodeChecks>,
}

/// Crawl report with per-page analyzer results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlAuditReport {
    pub total_visited: usize,
    pub results: Vec<CheckedNode>,
}

impl CrawlAuditReport {
    pub fn nodes(&self) -> Vec<CrawlNode> {
        self.results.iter().map(|checked| checked.node.clone()).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "analyzer panicked".to_string()
    }
}

/// Run one analyzer, turning an error or a panic into an inline failure
async fn capture_check<T, F>(label: &str, check: F) -> CheckOutcome<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(check).catch_unwind().await {
        Ok(Ok(value)) => CheckOutcome::Completed(value),
        Ok(Err(e)) => {
            error!("{} check failed: {}", label, e);
            CheckOutcome::Failed(CheckFailure::new(label, e.to_string()))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("{} check panicked: {}", label, message);
            CheckOutcome::Failed(CheckFailure::new(label, message))
        }
    }
}

/// Entry point of the audit engine
pub struct Auditor {
    config: AuditConfig,
    launcher: Arc<dyn BrowserLauncher>,
}

impl Auditor {
    /// Auditor driving a local Chrome
    pub fn new(config: AuditConfig) -> Self {
        let launcher = Arc::new(ChromeLauncher::new(config.browser.clone()));
        Self { config, launcher }
    }

    pub fn with_launcher(config: AuditConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    fn parse_targets(urls: &[String]) -> Result<Vec<AuditTarget>> {
        if urls.is_empty() {
            return Err(AuditError::InvalidInput("At least one URL is required".to_string()));
        }
        urls.iter().map(|url| AuditTarget::parse(url)).collect()
    }

    /// Run the requested checks over `urls`.
    ///
    /// Fails only on invalid input; an analyzer that fails is reported inline.
    pub async fn run_checks(&self, urls: &[String], checks: Checks) -> Result<CheckResults> {
        let targets = Self::parse_targets(urls)?;
        self.run_targets(&targets, checks).await
    }

    pub async fn run_request(&self, request: &AuditRequest) -> Result<CheckResults> {
        self.run_checks(&request.urls, request.checks).await
    }

    async fn run_targets(&self, targets: &[AuditTarget], checks: Checks) -> Result<CheckResults> {
        let checks = checks.normalized();
        let span = info_span!("audit", audit_id = %Uuid::new_v4());

        async {
            info!("Auditing {} targets ({:?})", targets.len(), checks);
            let launcher = self.launcher.as_ref();
            let mut results = CheckResults::default();

            if checks.check404 {
                let checker = ReachabilityChecker::new(self.config.reachability.clone());
                results.check404 = Some(capture_check("404", checker.run(launcher, targets)).await);
            }

            if checks.duplicate {
                let detector = DuplicateDetector::new(self.config.duplicate.clone());
                results.duplicate = Some(capture_check("Duplicate", detector.run(launcher, targets)).await);
            }

            if checks.seo {
                let seo = capture_check("SEO", async {
                    let analyzer = SeoAnalyzer::new(
                        self.config.seo.clone(),
                        self.config.browser.user_agent.as_deref(),
                    )?;
                    analyzer.run(launcher, targets).await
                })
                .await;
                results.seo = Some(seo);
            }

            info!("Audit finished");
            Ok(results)
        }
        .instrument(span)
        .await
    }

    /// Crawl from `start_url`, then run `checks` over every page that loaded
    pub async fn crawl_and_check(
        &self,
        start_url: &str,
        max_depth: u32,
        same_domain_only: bool,
        checks: Checks,
    ) -> Result<CrawlAuditReport> {
        if start_url.trim().is_empty() {
            return Err(AuditError::InvalidInput("A start URL is required".to_string()));
        }

        let crawler = BoundedCrawler::new(self.config.crawler.clone());
        let report = crawler
            .crawl(self.launcher.as_ref(), start_url, max_depth, same_domain_only)
            .instrument(info_span!("crawl", audit_id = %Uuid::new_v4()))
            .await?;

        let loaded: Vec<AuditTarget> = report
            .results
            .iter()
            .filter(|node| node.status.is_some())
            .filter_map(|node| AuditTarget::parse(&node.url).ok())
            .collect();

        let batch = if checks.any() && !loaded.is_empty() {
            Some(self.run_targets(&loaded, checks).await?)
        } else {
            None
        };

        let results = report
            .results
            .into_iter()
            .map(|node| {
                let checks = match &batch {
                    Some(batch) if node.status.is_some() => Some(node_checks(batch, &node.url)),
                    _ => None,
                };
                CheckedNode { node, checks }
            })
            .collect();

        Ok(CrawlAuditReport {
            total_visited: report.total_visited,
            results,
        })
    }
}

/// Pick the part of each batch result that belongs to `url`
fn node_checks(batch: &CheckResults, url: &str) -> NodeChecks {
    fn pick<R: Clone, T>(
        outcome: &Option<CheckOutcome<R>>,
        find: impl Fn(&R) -> Option<T>,
    ) -> Option<CheckOutcome<T>> {
        match outcome.as_ref()? {
            CheckOutcome::Failed(failure) => Some(CheckOutcome::Failed(failure.clone())),
            CheckOutcome::Completed(report) => find(report).map(CheckOutcome::Completed),
        }
    }

    NodeChecks {
        check404: pick(&batch.check404, |report| {
            report.results.iter().find(|r| r.url == url).cloned()
        }),
        duplicate: pick(&batch.duplicate, |report| {
            report.results.iter().find(|r| r.url == url).cloned()
        }),
        seo: pick(&batch.seo, |results| {
            results.iter().find(|r| r.original_url == url).cloned()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeDocument, FakeLauncher, FakeWeb};
    use crate::browser::{BrowserError, MockBrowserLauncher};
    use serde_json::json;
    use wiremock::matchers::any;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html lang="en"><head><title>Shared landing page</title></head>
        <body><h1>Offer</h1><script>var t = Date.now();</script></body></html>"#;

    fn auditor(launcher: Arc<dyn BrowserLauncher>) -> Auditor {
        Auditor::with_launcher(AuditConfig::default(), launcher)
    }

    #[test]
    fn test_checks_all_implies_everything() {
        let checks = Checks { all: true, ..Default::default() }.normalized();
        assert!(checks.check404 && checks.duplicate && checks.seo);
        assert!(!Checks::default().any());
        assert!(Checks { seo: true, ..Default::default() }.any());
    }

    #[test]
    fn test_audit_target_parse() {
        let target = AuditTarget::parse(" Example.com/a ").unwrap();
        assert_eq!(target.as_str(), "https://example.com/a");
        assert_eq!(target.host().as_deref(), Some("example.com"));
        assert!(matches!(AuditTarget::parse("http://"), Err(AuditError::InvalidInput(_))));
    }

    #[test]
    fn test_request_from_json() {
        let request = AuditRequest::from_json(&json!({
            "urls": ["example.com"],
            "checks": {"check404": true}
        }))
        .unwrap();
        assert_eq!(request.urls, vec!["example.com"]);
        assert!(request.checks.check404);
        assert!(!request.checks.seo);

        for bad in [
            json!({}),
            json!({"urls": "https://example.com"}),
            json!({"urls": []}),
            json!({"urls": [42]}),
            json!({"urls": ["a.com"], "checks": {"seo": "yes"}}),
        ] {
            assert!(matches!(AuditRequest::from_json(&bad), Err(AuditError::InvalidInput(_))), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_without_browser() {
        let mut launcher = MockBrowserLauncher::new();
        launcher.expect_launch().never();

        let err = auditor(Arc::new(launcher)).run_checks(&[], Checks::everything()).await.unwrap_err();
        assert!(matches!(err, AuditError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_malformed_url_rejected_without_browser() {
        let mut launcher = MockBrowserLauncher::new();
        launcher.expect_launch().never();

        let urls = vec!["https://example.com".to_string(), "http://".to_string()];
        let err = auditor(Arc::new(launcher)).run_checks(&urls, Checks::everything()).await.unwrap_err();
        assert!(matches!(err, AuditError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_launch_failure_reported_per_check() {
        let mut launcher = MockBrowserLauncher::new();
        launcher
            .expect_launch()
            .times(2)
            .returning(|| Err(BrowserError::Launch("chrome not found".to_string())));

        let checks = Checks { check404: true, duplicate: true, ..Default::default() };
        let results = auditor(Arc::new(launcher))
            .run_checks(&["https://example.com".to_string()], checks)
            .await
            .unwrap();

        match &results.check404 {
            Some(CheckOutcome::Failed(failure)) => {
                assert!(failure.error);
                assert_eq!(failure.error_message, "404 check failed inside worker.");
                assert!(failure.raw_error.contains("chrome not found"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(results.duplicate.as_ref().unwrap().is_failed());
        assert!(results.seo.is_none());
        assert!(results.duplicate_summary().is_none());

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["duplicate"]["errorMessage"], "Duplicate check failed inside worker.");
        assert!(json.get("seo").is_none());
    }

    #[tokio::test]
    async fn test_panicking_check_is_contained() {
        async fn explode() -> Result<()> {
            panic!("boom")
        }

        let outcome = capture_check("SEO", explode()).await;
        match outcome {
            CheckOutcome::Failed(failure) => {
                assert_eq!(failure.error_message, "SEO check failed inside worker.");
                assert_eq!(failure.raw_error, "boom");
            }
            CheckOutcome::Completed(_) => panic!("panic was not captured"),
        }
    }

    #[tokio::test]
    async fn test_identical_pages_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let a = format!("{}/a", server.uri());
        let b = format!("{}/b", server.uri());
        let root = format!("{}/", server.uri());
        let web = FakeWeb::new()
            .page(&a, FakeDocument::html(200, PAGE))
            .page(&b, FakeDocument::html(200, &PAGE.replace("Date.now()", "0")))
            .page(&root, FakeDocument::html(200, PAGE));
        let launcher = Arc::new(FakeLauncher::new(web));

        let results = auditor(launcher.clone())
            .run_checks(&[a.clone(), b.clone()], Checks { all: true, ..Default::default() })
            .await
            .unwrap();

        let reachability = results.check404.as_ref().and_then(CheckOutcome::completed).unwrap();
        assert!(reachability.results.iter().all(|r| !r.problematic && r.main_status == Some(200)));

        let duplicate = results.duplicate.as_ref().and_then(CheckOutcome::completed).unwrap();
        assert_eq!(duplicate.groups.len(), 1);
        assert_eq!(duplicate.groups[0].urls, vec![a.clone(), b.clone()]);

        let summary = results.duplicate_summary().unwrap();
        assert!(summary.detected);
        assert_eq!(summary.items_count, 2);

        let seo = results.seo.as_ref().and_then(CheckOutcome::completed).unwrap();
        assert_eq!(seo.len(), 2);
        assert!(seo.iter().all(|r| r.reachable && r.snapshot.is_some()));
        assert_eq!(seo[0].snapshot.as_ref().unwrap().heuristics, seo[1].snapshot.as_ref().unwrap().heuristics);

        assert!(launcher.stats.all_released());
    }

    #[tokio::test]
    async fn test_crawl_and_check_attaches_results() {
        let web = FakeWeb::new()
            .page("https://example.com/", FakeDocument::html(200, r#"<a href="/a">a</a><a href="/gone">b</a>"#))
            .page("https://example.com/a", FakeDocument::html(200, "<p>a</p>"))
            .page("https://example.com/gone", FakeDocument::unreachable());
        let launcher = Arc::new(FakeLauncher::new(web));

        let checks = Checks { check404: true, ..Default::default() };
        let report = auditor(launcher.clone())
            .crawl_and_check("https://example.com", 1, true, checks)
            .await
            .unwrap();

        assert_eq!(report.total_visited, 3);
        let with_checks: Vec<&CheckedNode> = report.results.iter().filter(|n| n.checks.is_some()).collect();
        assert_eq!(with_checks.len(), 2);

        let first = with_checks[0].checks.as_ref().unwrap();
        let reach = first.check404.as_ref().and_then(CheckOutcome::completed).unwrap();
        assert_eq!(reach.url, "https://example.com/");
        assert!(first.duplicate.is_none());

        let gone = report.results.iter().find(|n| n.node.url.ends_with("/gone")).unwrap();
        assert!(gone.checks.is_none());
        assert!(gone.node.error.is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalVisited"], 3);
        assert_eq!(json["results"][0]["url"], "https://example.com/");
        assert!(json["results"][0]["parentUrl"].is_null());
    }

    #[tokio::test]
    async fn test_crawl_requires_start_url() {
        let mut launcher = MockBrowserLauncher::new();
        launcher.expect_launch().never();

        let err = auditor(Arc::new(launcher))
            .crawl_and_check("  ", 1, true, Checks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::InvalidInput(_)));
    }
}
