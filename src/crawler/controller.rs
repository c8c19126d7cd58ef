use std::collections::{HashSet, VecDeque};
use scraper::{Html, Selector};
use url::Url;
use tracing::{debug, info, warn};

use crate::browser::{release, BrowserLauncher, BrowserSession, NavigateOptions, ResponseCapture, WaitUntil};
use crate::cli::config::CrawlerSettings;
use crate::crawler::scheduler::{CrawlScheduler, DepthQuotas};
use crate::crawler::task::{CrawlNode, CrawlQueueEntry, CrawlReport};
use crate::error::{AuditError, Result};
use crate::utils::urls::parse_target;

/// Breadth-first crawler bounded by depth and per-depth quotas
pub struct BoundedCrawler {
    config: CrawlerSettings,
}

impl BoundedCrawler {
    pub fn new(config: CrawlerSettings) -> Self {
        Self { config }
    }

    /// Crawl from `start_url` and return every visited node.
    ///
    /// Navigation failures are recorded on the node; only a missing or
    /// malformed start URL and a browser launch failure are errors.
    pub async fn crawl(
        &self,
        launcher: &dyn BrowserLauncher,
        start_url: &str,
        max_depth: u32,
        same_domain_only: bool,
    ) -> Result<CrawlReport> {
        let start = parse_target(start_url)
            .ok_or_else(|| AuditError::InvalidInput(format!("Invalid start URL: {:?}", start_url)))?;

        let mut scheduler = CrawlScheduler::new(
            &start,
            max_depth,
            same_domain_only,
            DepthQuotas::new(self.config.depth_quotas.clone()),
        );
        let seed = scheduler
            .seed(&start)
            .ok_or_else(|| AuditError::InvalidInput(format!("Invalid start URL: {:?}", start_url)))?;

        info!("Crawling {} (max depth {}, same domain only: {})", seed.url, max_depth, same_domain_only);

        let session = launcher.launch().await?;

        let mut queue = VecDeque::from([seed]);
        let mut results = Vec::new();

        while let Some(entry) = queue.pop_front() {
            if !scheduler.admit(&entry) {
                continue;
            }

            let (node, hrefs) = self.visit(session.as_ref(), &entry, max_depth).await;
            results.push(node);

            let base = match Url::parse(&entry.url) {
                Ok(base) => base,
                Err(_) => continue,
            };
            for href in hrefs {
                if let Some(child) = scheduler.schedule(&href, &entry, &base) {
                    debug!("Queued {} at depth {}", child.url, child.depth);
                    queue.push_back(child);
                }
            }
        }

        release("crawl browser session", session.close()).await;

        info!("Crawl finished: {} pages visited", scheduler.visited_count());

        Ok(CrawlReport {
            total_visited: scheduler.visited_count(),
            results,
        })
    }

    /// Navigate to one entry; returns its node and, below max depth, the hrefs it links to
    async fn visit(
        &self,
        session: &dyn BrowserSession,
        entry: &CrawlQueueEntry,
        max_depth: u32,
    ) -> (CrawlNode, Vec<String>) {
        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("Could not open page for {}: {}", entry.url, e);
                return (CrawlNode::failed(entry, e.to_string()), Vec::new());
            }
        };

        let options = NavigateOptions::new(WaitUntil::DomContentLoaded, self.config.navigation_timeout_ms, 0);
        let mut capture = ResponseCapture::new();

        let outcome = match page.goto(&entry.url, &options, &mut capture).await {
            Ok(status) => {
                debug!("Visited {} (status {:?}, depth {})", entry.url, status, entry.depth);

                let hrefs = if entry.depth < max_depth {
                    match page.content().await {
                        Ok(html) => extract_hrefs(&html),
                        Err(e) => {
                            warn!("Failed to read links from {}: {}", entry.url, e);
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                };

                (CrawlNode::visited(entry, status), hrefs)
            }
            Err(e) => {
                warn!("Navigation failed for {}: {}", entry.url, e);
                (CrawlNode::failed(entry, e.to_string()), Vec::new())
            }
        };

        release("crawl page", page.close()).await;
        outcome
    }
}

/// Unique `href` values of every anchor, in document order
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| seen.insert(href.clone()))
        .collect()
}
