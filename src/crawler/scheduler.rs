use std::collections::{BTreeMap, HashMap, HashSet};
use url::Url;
use tracing::debug;

use crate::crawler::task::CrawlQueueEntry;
use crate::utils::urls::{is_same_or_subdomain, strip_query_and_fragment};

/// Maximum number of pages per depth
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthQuotas(BTreeMap<u32, usize>);

impl DepthQuotas {
    pub fn new(quotas: BTreeMap<u32, usize>) -> Self {
        Self(quotas)
    }

    /// Limit for `depth`, or None when that depth is unbounded
    pub fn limit(&self, depth: u32) -> Option<usize> {
        self.0.get(&depth).copied()
    }

    fn allows(&self, depth: u32, used: usize) -> bool {
        self.limit(depth).map_or(true, |limit| used < limit)
    }
}

/// Decides which discovered links enter the queue and which dequeued entries get visited
pub struct CrawlScheduler {
    /// Host of the start URL
    start_host: String,

    max_depth: u32,

    same_domain_only: bool,

    quotas: DepthQuotas,

    /// URLs already navigated to
    visited: HashSet<String>,

    /// URLs ever placed in the queue
    queued: HashSet<String>,

    /// Entries enqueued per depth
    scheduled: HashMap<u32, usize>,

    /// Entries visited per depth
    visited_per_depth: HashMap<u32, usize>,
}

impl CrawlScheduler {
    pub fn new(start: &Url, max_depth: u32, same_domain_only: bool, quotas: DepthQuotas) -> Self {
        Self {
            start_host: start.host_str().unwrap_or_default().to_lowercase(),
            max_depth,
            same_domain_only,
            quotas,
            visited: HashSet::new(),
            queued: HashSet::new(),
            scheduled: HashMap::new(),
            visited_per_depth: HashMap::new(),
        }
    }

    /// Queue entry for the start URL
    pub fn seed(&mut self, start: &Url) -> Option<CrawlQueueEntry> {
        let url = Self::normalize_url(start.as_str(), None)?;
        self.queued.insert(url.clone());
        *self.scheduled.entry(0).or_default() += 1;
        Some(CrawlQueueEntry::seed(url))
    }

    /// Links that can never lead to another page
    pub fn is_navigable_href(href: &str) -> bool {
        let href = href.trim();
        let lower = href.to_ascii_lowercase();
        !(href.is_empty()
            || href.starts_with('#')
            || lower.starts_with("mailto:")
            || lower.starts_with("tel:")
            || lower.starts_with("javascript:"))
    }

    /// Resolve against `base` and drop query and fragment; only http(s) survives
    pub fn normalize_url(href: &str, base: Option<&Url>) -> Option<String> {
        let normalized = strip_query_and_fragment(href.trim(), base)?;
        let parsed = Url::parse(&normalized).ok()?;
        match parsed.scheme() {
            "http" | "https" => Some(normalized),
            _ => None,
        }
    }

    /// Turn a link found on `parent` into a queue entry, or None if it must not be crawled
    pub fn schedule(&mut self, href: &str, parent: &CrawlQueueEntry, base: &Url) -> Option<CrawlQueueEntry> {
        let depth = parent.depth + 1;
        if depth > self.max_depth || !Self::is_navigable_href(href) {
            return None;
        }

        let url = Self::normalize_url(href, Some(base))?;

        if self.same_domain_only {
            let host = Url::parse(&url).ok()?.host_str()?.to_lowercase();
            if !is_same_or_subdomain(&host, &self.start_host) {
                debug!("Skipping off-domain link: {}", url);
                return None;
            }
        }

        if self.visited.contains(&url) || self.queued.contains(&url) {
            return None;
        }

        // Checked before enqueueing so the queue never outgrows the quota
        let scheduled = self.scheduled.get(&depth).copied().unwrap_or(0);
        if !self.quotas.allows(depth, scheduled) {
            debug!("Depth {} quota reached, dropping {}", depth, url);
            return None;
        }

        self.queued.insert(url.clone());
        self.scheduled.insert(depth, scheduled + 1);
        Some(CrawlQueueEntry::child(url, parent))
    }

    /// Claim a dequeued entry for visiting
    pub fn admit(&mut self, entry: &CrawlQueueEntry) -> bool {
        if entry.depth > self.max_depth || self.visited.contains(&entry.url) {
            return false;
        }

        let used = self.visited_per_depth.get(&entry.depth).copied().unwrap_or(0);
        if !self.quotas.allows(entry.depth, used) {
            debug!("Depth {} quota met, skipping {}", entry.depth, entry.url);
            return false;
        }

        self.visited.insert(entry.url.clone());
        self.visited_per_depth.insert(entry.depth, used + 1);
        true
    }

    /// Number of URLs visited so far
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}
