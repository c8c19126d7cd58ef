use std::collections::BTreeMap;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::audit::seo::schema;

const OPEN_GRAPH_TAGS: &[&str] = &["og:title", "og:description", "og:image", "og:url", "og:type"];
const TWITTER_TAGS: &[&str] = &["twitter:card", "twitter:title", "twitter:description", "twitter:image"];

/// Head metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub robots: Option<String>,
    pub charset: Option<String>,
    pub viewport: Option<String>,
    pub author: Option<String>,
    pub theme_color: Option<String>,
    /// `<meta http-equiv="Content-Type">`
    pub content_type: Option<String>,
    pub favicon: Option<String>,
}

/// A value that may be missing from the page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub value: Option<String>,
    pub present: bool,
}

impl Presence {
    fn of(value: Option<String>) -> Self {
        Self {
            present: value.is_some(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headings {
    pub h1_count: usize,
    pub h1_texts: Vec<String>,
    pub h2_count: usize,
    pub h3_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    pub total: usize,
    pub with_alt: usize,
    pub without_alt: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub total: usize,
    pub internal: usize,
    pub external: usize,
    pub follow: usize,
    pub nofollow: usize,
}

/// Presence of the root-level crawler files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crawlability {
    pub robots_txt: bool,
    pub sitemap_xml: bool,
}

/// Pass/fail checks derived from a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoHeuristics {
    pub title_length: usize,
    pub title_length_ok: bool,
    pub description_length: usize,
    pub description_length_ok: bool,
    pub has_canonical: bool,
    pub has_html_lang: bool,
    pub has_h1: bool,
    pub multiple_h1: bool,
    pub has_open_graph: bool,
    pub has_twitter_card: bool,
    pub has_schema: bool,
    /// Share of images with alt text; None when the page has no images
    pub image_alt_coverage: Option<f64>,
}

/// Everything the SEO analyzer reads from one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoSnapshot {
    pub basic_meta: BasicMeta,
    pub open_graph: BTreeMap<String, String>,
    pub twitter_card: BTreeMap<String, String>,
    pub canonical: Presence,
    pub html_lang: Presence,
    pub headings: Headings,
    pub images: ImageStats,
    pub links: LinkStats,
    pub structured_data_types: Vec<String>,
    /// JSON-LD blocks that parsed
    pub structured_data_blocks: usize,
    pub crawlability: Crawlability,
    pub heuristics: SeoHeuristics,
}

impl SeoHeuristics {
    pub fn derive(snapshot: &SeoSnapshot) -> Self {
        let title_length = snapshot.basic_meta.title.as_deref().map_or(0, |t| t.chars().count());
        let description_length = snapshot
            .basic_meta
            .description
            .as_deref()
            .map_or(0, |d| d.chars().count());

        let image_alt_coverage = if snapshot.images.total == 0 {
            None
        } else {
            Some(snapshot.images.with_alt as f64 / snapshot.images.total as f64)
        };

        Self {
            title_length,
            title_length_ok: (30..=65).contains(&title_length),
            description_length,
            description_length_ok: (70..=160).contains(&description_length),
            has_canonical: snapshot.canonical.present,
            has_html_lang: snapshot.html_lang.present,
            has_h1: snapshot.headings.h1_count > 0,
            multiple_h1: snapshot.headings.h1_count > 1,
            has_open_graph: !snapshot.open_graph.is_empty(),
            has_twitter_card: !snapshot.twitter_card.is_empty(),
            has_schema: snapshot.structured_data_blocks > 0,
            image_alt_coverage,
        }
    }
}

fn select<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(e) => {
            debug!("Invalid selector {:?}: {:?}", css, e);
            Vec::new()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn text_of(element: &ElementRef) -> String {
    element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    select(document, css)
        .into_iter()
        .find_map(|element| non_empty(element.value().attr(attr)))
}

/// `<meta name=key>` content, falling back to `<meta property=key>`
fn meta_content(document: &Html, key: &str) -> Option<String> {
    first_attr(document, &format!(r#"meta[name="{}"]"#, key), "content")
        .or_else(|| first_attr(document, &format!(r#"meta[property="{}"]"#, key), "content"))
}

fn tag_set(document: &Html, keys: &[&str]) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|key| meta_content(document, key).map(|value| (key.to_string(), value)))
        .collect()
}

fn has_rel(element: &ElementRef, token: &str) -> bool {
    element
        .value()
        .attr("rel")
        .map_or(false, |rel| rel.split_whitespace().any(|t| t.eq_ignore_ascii_case(token)))
}

fn basic_meta(document: &Html, title: Option<String>) -> BasicMeta {
    let title = non_empty(title.as_deref())
        .or_else(|| select(document, "title").first().map(text_of).filter(|t| !t.is_empty()));

    let content_type = select(document, "meta[http-equiv]")
        .into_iter()
        .find(|m| {
            m.value()
                .attr("http-equiv")
                .map_or(false, |v| v.trim().eq_ignore_ascii_case("content-type"))
        })
        .and_then(|m| non_empty(m.value().attr("content")));

    let favicon = select(document, "link[rel][href]")
        .into_iter()
        .find(|link| has_rel(link, "icon"))
        .and_then(|link| non_empty(link.value().attr("href")));

    BasicMeta {
        title,
        description: meta_content(document, "description"),
        robots: meta_content(document, "robots"),
        charset: first_attr(document, "meta[charset]", "charset"),
        viewport: meta_content(document, "viewport"),
        author: meta_content(document, "author"),
        theme_color: meta_content(document, "theme-color"),
        content_type,
        favicon,
    }
}

fn headings(document: &Html) -> Headings {
    let h1 = select(document, "h1");
    Headings {
        h1_count: h1.len(),
        h1_texts: h1.iter().map(text_of).filter(|t| !t.is_empty()).collect(),
        h2_count: select(document, "h2").len(),
        h3_count: select(document, "h3").len(),
    }
}

fn images(document: &Html) -> ImageStats {
    let images = select(document, "img");
    let with_alt = images
        .iter()
        .filter(|img| non_empty(img.value().attr("alt")).is_some())
        .count();
    ImageStats {
        total: images.len(),
        with_alt,
        without_alt: images.len() - with_alt,
    }
}

fn links(document: &Html, page_url: &Url) -> LinkStats {
    let origin = page_url.origin();
    let mut stats = LinkStats::default();

    for anchor in select(document, "a[href]") {
        stats.total += 1;

        if let Some(href) = anchor.value().attr("href") {
            if let Ok(resolved) = page_url.join(href.trim()) {
                if resolved.origin() == origin {
                    stats.internal += 1;
                } else if matches!(resolved.scheme(), "http" | "https") {
                    stats.external += 1;
                }
            }
        }

        if has_rel(&anchor, "nofollow") {
            stats.nofollow += 1;
        } else {
            stats.follow += 1;
        }
    }

    stats
}

/// `@type` values of every JSON-LD block and the number of blocks that parsed
fn structured_data(document: &Html) -> (Vec<String>, usize) {
    let mut types: Vec<String> = Vec::new();
    let mut parsed = 0;

    for block in select(document, "script[type]") {
        let is_json_ld = block
            .value()
            .attr("type")
            .map_or(false, |t| t.trim().eq_ignore_ascii_case("application/ld+json"));
        if !is_json_ld {
            continue;
        }

        let raw: String = block.text().collect();
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => {
                parsed += 1;
                for found in schema::collect_types(&value) {
                    if !types.contains(&found) {
                        types.push(found);
                    }
                }
            }
            Err(e) => debug!("Ignoring malformed JSON-LD block: {}", e),
        }
    }

    (types, parsed)
}

/// Build a snapshot from rendered HTML. `title` is the browser-reported title, if any.
pub fn extract_snapshot(html: &str, page_url: &Url, title: Option<String>, crawlability: Crawlability) -> SeoSnapshot {
    let document = Html::parse_document(html);
    let (structured_data_types, structured_data_blocks) = structured_data(&document);

    let mut snapshot = SeoSnapshot {
        basic_meta: basic_meta(&document, title),
        open_graph: tag_set(&document, OPEN_GRAPH_TAGS),
        twitter_card: tag_set(&document, TWITTER_TAGS),
        canonical: Presence::of(first_attr(&document, r#"link[rel="canonical"]"#, "href")),
        html_lang: Presence::of(first_attr(&document, "html", "lang")),
        headings: headings(&document),
        images: images(&document),
        links: links(&document, page_url),
        structured_data_types,
        structured_data_blocks,
        crawlability,
        heuristics: SeoHeuristics::default(),
    };
    snapshot.heuristics = SeoHeuristics::derive(&snapshot);
    snapshot
}
