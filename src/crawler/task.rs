use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

/// A URL waiting in the crawl queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlQueueEntry {
    /// Normalized URL (no query, no fragment)
    pub url: String,

    /// Distance from the start URL (0 for the start URL itself)
    pub depth: u32,

    /// Page the link was found on (None for the start URL)
    pub parent_url: Option<String>,
}

impl CrawlQueueEntry {
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            parent_url: None,
        }
    }

    pub fn child(url: impl Into<String>, parent: &CrawlQueueEntry) -> Self {
        Self {
            url: url.into(),
            depth: parent.depth + 1,
            parent_url: Some(parent.url.clone()),
        }
    }
}

/// A page the crawler dequeued and navigated to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlNode {
    pub url: String,

    /// Main document status; None when navigation failed
    pub status: Option<u16>,

    pub depth: u32,

    pub parent_url: Option<String>,

    /// Navigation error message, if any
    pub error: Option<String>,

    /// When the page was visited
    pub crawled_at: DateTime<Utc>,
}

impl CrawlNode {
    pub fn visited(entry: &CrawlQueueEntry, status: Option<u16>) -> Self {
        Self {
            url: entry.url.clone(),
            status,
            depth: entry.depth,
            parent_url: entry.parent_url.clone(),
            error: None,
            crawled_at: Utc::now(),
        }
    }

    pub fn failed(entry: &CrawlQueueEntry, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::visited(entry, None)
        }
    }
}

/// Outcome of a bounded crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub total_visited: usize,

    /// Nodes in visiting order; the first one is the start URL
    pub results: Vec<CrawlNode>,
}
