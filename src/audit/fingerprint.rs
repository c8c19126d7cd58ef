use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::browser::{CapturedResponse, PageHandle};

static COMMENTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static STYLES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static META: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<meta\b[^>]*>").unwrap());
static HINT_LINKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*\brel\s*=\s*["']?(?:preload|prefetch|modulepreload|dns-prefetch|preconnect)\b[^>]*>"#).unwrap()
});
static HYDRATION_ATTRS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s(?:data-rsc|data-nextjs[\w-]*|nonce|data-?ssr|data-?props)\b\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap()
});
static CACHE_BUSTERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[?&]_rsc=[^"'&\s>]*"#).unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Query parameters that only defeat caches
const CACHE_BUSTING_PARAMS: &[&str] = &["_rsc"];

/// URL fragments of build-tool assets, SSR payloads, live-reload sockets and API calls
const FRAMEWORK_PATTERNS: &[&str] = &["/_next/", "_rsc", "sockjs-node", "/api/", "__webpack_hmr"];

/// Strip markup that changes between builds or requests without changing the page.
///
/// Passes repeat until nothing changes, since removing one construct can
/// expose another (`<!-<!---->- x -->`).
pub fn normalize_html(html: &str) -> String {
    let mut current = normalize_pass(html);
    loop {
        let next = normalize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_pass(html: &str) -> String {
    let html = COMMENTS.replace_all(html, "");
    let html = SCRIPTS.replace_all(&html, "");
    let html = STYLES.replace_all(&html, "");
    let html = META.replace_all(&html, "");
    let html = HINT_LINKS.replace_all(&html, "");
    let html = HYDRATION_ATTRS.replace_all(&html, "");
    let html = CACHE_BUSTERS.replace_all(&html, "");
    WHITESPACE.replace_all(&html, " ").trim().to_string()
}

/// Lowercase hex SHA-256 of `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Drop cache-busting query parameters from a URL
pub fn strip_cache_busting(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CACHE_BUSTING_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

pub fn is_framework_internal(url: &str) -> bool {
    FRAMEWORK_PATTERNS.iter().any(|pattern| url.contains(pattern))
}

/// Distinct URLs that served identical content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub urls: Vec<String>,
}

/// Content hash → URLs that produced it
pub type FingerprintIndex = BTreeMap<String, BTreeSet<String>>;

/// Groups of two or more URLs, ordered by hash
pub fn duplicate_groups(index: &FingerprintIndex) -> Vec<DuplicateGroup> {
    index
        .iter()
        .filter(|(_, urls)| urls.len() > 1)
        .map(|(hash, urls)| DuplicateGroup {
            hash: hash.clone(),
            urls: urls.iter().cloned().collect(),
        })
        .collect()
}

/// Add every fingerprint of `other` into `into`
pub fn merge_index(into: &mut FingerprintIndex, other: &FingerprintIndex) {
    for (hash, urls) in other {
        into.entry(hash.clone()).or_default().extend(urls.iter().cloned());
    }
}

/// Hashes the responses of one target's page loads
pub struct ContentFingerprinter {
    /// Hosts of the batch's input URLs
    hosts: HashSet<String>,

    max_body_bytes: usize,

    /// (url, status) pairs already processed
    seen: HashSet<(String, u16)>,

    index: FingerprintIndex,

    responses_seen: usize,
}

impl ContentFingerprinter {
    pub fn new(hosts: HashSet<String>, max_body_bytes: usize) -> Self {
        Self {
            hosts,
            max_body_bytes,
            seen: HashSet::new(),
            index: BTreeMap::new(),
            responses_seen: 0,
        }
    }

    /// Whether a response is worth fetching a body for; marks it as seen
    pub fn accepts(&mut self, response: &CapturedResponse) -> bool {
        if is_framework_internal(&response.url) {
            return false;
        }

        let in_scope = Url::parse(&response.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_lowercase))
            .map_or(false, |host| self.hosts.contains(&host));
        if !in_scope {
            return false;
        }

        if !(200..400).contains(&response.status) {
            return false;
        }

        self.seen.insert((response.url.clone(), response.status))
    }

    /// Hash a body the way `response` would be compared; None when it must be skipped
    pub fn fingerprint(&self, response: &CapturedResponse, body: &[u8]) -> Option<String> {
        if body.is_empty() || body.len() > self.max_body_bytes {
            return None;
        }

        if response.is_html() {
            let normalized = normalize_html(&String::from_utf8_lossy(body));
            if normalized.is_empty() {
                return None;
            }
            Some(content_hash(normalized.as_bytes()))
        } else {
            Some(content_hash(body))
        }
    }

    /// Fetch, hash and index every accepted response; body failures are skipped
    pub async fn ingest(&mut self, page: &dyn PageHandle, responses: Vec<CapturedResponse>) {
        for response in responses {
            self.responses_seen += 1;
            if !self.accepts(&response) {
                continue;
            }

            let body = match page.response_body(&response).await {
                Ok(body) => body,
                Err(e) => {
                    debug!("Skipping unreadable body of {}: {}", response.url, e);
                    continue;
                }
            };

            match self.fingerprint(&response, &body) {
                Some(hash) => {
                    self.index.entry(hash).or_default().insert(response.url);
                }
                None => debug!("Skipping body of {} ({} bytes)", response.url, body.len()),
            }
        }
    }

    pub fn responses_seen(&self) -> usize {
        self.responses_seen
    }

    /// Number of distinct fingerprints
    pub fn fingerprint_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &FingerprintIndex {
        &self.index
    }

    pub fn groups(&self) -> Vec<DuplicateGroup> {
        duplicate_groups(&self.index)
    }
}
