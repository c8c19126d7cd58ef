use url::Url;

/// Trim the input, prefix `https://` when no scheme is given and parse it.
/// Returns `None` unless the result is an absolute http(s) URL with a host.
pub fn parse_target(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else if lower.contains("://") {
        return None;
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&with_scheme).ok()?;
    url.host_str()?;
    Some(url)
}

/// Scheme and host only, with a trailing slash (`https://example.com/`).
/// A non-default port is kept.
pub fn root_url(url: &Url) -> String {
    match url.origin() {
        origin @ url::Origin::Tuple(..) => format!("{}/", origin.ascii_serialization()),
        url::Origin::Opaque(_) => url.to_string(),
    }
}

/// Resolve `raw` (optionally against `base`) and drop query and fragment
pub fn strip_query_and_fragment(raw: &str, base: Option<&Url>) -> Option<String> {
    let mut url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// True when `host` is `domain` or one of its subdomains
pub fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    let host = host.to_lowercase();
    let domain = domain.to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}
