pub mod extract;
pub mod schema;

use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::audit::AuditTarget;
use crate::browser::{release, BrowserLauncher, BrowserSession, NavigateOptions, ResponseCapture, WaitUntil};
use crate::cli::config::SeoSettings;
use crate::error::Result;
use crate::utils::urls::root_url;

// Re-export common types
pub use extract::{
    extract_snapshot, BasicMeta, Crawlability, Headings, ImageStats, LinkStats, Presence, SeoHeuristics,
    SeoSnapshot,
};

/// SEO outcome for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoResult {
    pub original_url: String,
    /// Scheme and host of the target; this is the page actually analyzed
    pub root_url: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SeoSnapshot>,
}

impl SeoResult {
    fn unreachable(original_url: &str, root_url: &str) -> Self {
        Self {
            original_url: original_url.to_string(),
            root_url: root_url.to_string(),
            reachable: false,
            error: Some("URL not reachable".to_string()),
            snapshot: None,
        }
    }
}

/// Extracts on-page SEO metadata from each target's root page
pub struct SeoAnalyzer {
    config: SeoSettings,
    client: reqwest::Client,
}

impl SeoAnalyzer {
    pub fn new(config: SeoSettings, user_agent: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.probe_timeout_ms));
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            config,
            client: builder.build()?,
        })
    }

    /// Plain HTTP reachability: HEAD, then GET if HEAD is refused
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => debug!("HEAD {} returned {}", url, response.status()),
            Err(e) => debug!("HEAD {} failed: {}", url, e),
        }

        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("GET {} failed: {}", url, e);
                false
            }
        }
    }

    /// Whether `path` under `root` answers 200
    async fn file_exists(&self, root: &Url, path: &str) -> bool {
        let Ok(url) = root.join(path) else { return false };
        match self.client.get(url.as_str()).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!("GET {} failed: {}", url, e);
                false
            }
        }
    }

    /// Analyze every target. The browser is only launched once a root URL answers.
    pub async fn run(&self, launcher: &dyn BrowserLauncher, targets: &[AuditTarget]) -> Result<Vec<SeoResult>> {
        info!("Analyzing SEO of {} targets", targets.len());

        let mut session: Option<Box<dyn BrowserSession>> = None;
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let root = root_url(&target.url);

            if !self.probe(&root).await {
                info!("{} is not reachable, skipping SEO analysis", root);
                results.push(SeoResult::unreachable(target.as_str(), &root));
                continue;
            }

            if session.is_none() {
                session = Some(launcher.launch().await?);
            }
            let Some(active) = session.as_deref() else { continue };

            results.push(self.analyze(active, target, &root).await);
        }

        if let Some(session) = session {
            release("seo browser session", session.close()).await;
        }

        Ok(results)
    }

    async fn analyze(&self, session: &dyn BrowserSession, target: &AuditTarget, root: &str) -> SeoResult {
        let mut result = SeoResult {
            original_url: target.as_str().to_string(),
            root_url: root.to_string(),
            reachable: true,
            error: None,
            snapshot: None,
        };

        let Ok(root_parsed) = Url::parse(root) else {
            result.error = Some(format!("Invalid root URL: {}", root));
            return result;
        };

        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };

        let options = NavigateOptions::new(WaitUntil::DomContentLoaded, self.config.navigation_timeout_ms, 0);
        let mut capture = ResponseCapture::new();
        if let Err(e) = page.goto(root, &options, &mut capture).await {
            // Whatever rendered before the failure is still analyzed
            debug!("Navigation to {} failed: {}", root, e);
        }

        let html = page.content().await.unwrap_or_default();
        let title = page.title().await.ok().flatten();
        let page_url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or_else(|| root_parsed.clone());

        release("seo page", page.close()).await;

        let (robots_txt, sitemap_xml) = futures::join!(
            self.file_exists(&root_parsed, "/robots.txt"),
            self.file_exists(&root_parsed, "/sitemap.xml"),
        );

        result.snapshot = Some(extract_snapshot(
            &html,
            &page_url,
            title,
            Crawlability { robots_txt, sitemap_xml },
        ));
        result
    }
}
