//! URL canonicalization and hashing.
//!
//! Every URL entering the queue is canonicalized first so that trivially
//! different spellings of the same address collapse to one `url_hash` and
//! one queue row per execution.

use url::Url;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{CrawlError, CrawlResult};

/// Canonicalize a URL for hashing and storage.
///
/// Lowercases scheme and host, strips the fragment and any default port,
/// and trims a trailing slash from non-root paths. Query strings are kept:
/// two URLs differing only in query are different pages.
pub fn canonicalize_url(raw: &str) -> CrawlResult<String> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| CrawlError::Parse(format!("invalid url {raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlError::Parse(format!(
            "unsupported scheme {} in {raw}",
            url.scheme()
        )));
    }

    url.set_fragment(None);

    let mut canonical = url.to_string();
    // Url keeps "/" for empty paths; trim trailing slash on deeper paths only
    if canonical.ends_with('/') && url.path() != "/" {
        canonical.pop();
    }

    Ok(canonical)
}

/// Stable hash of a canonical URL, rendered as 16 hex chars.
///
/// Callers are expected to pass the output of [`canonicalize_url`].
#[must_use]
pub fn url_hash(canonical: &str) -> String {
    format!("{:016x}", xxh3_64(canonical.as_bytes()))
}

/// Check whether a string is a crawlable http(s) URL
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Extract the host portion of a URL, lowercased.
///
/// Returns None for relative references and non-authority URLs.
#[must_use]
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Resolve an href against a base URL into an absolute crawlable URL.
///
/// Returns None for empty hrefs, fragments, non-http(s) results, and
/// unparseable input.
#[must_use]
pub fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);

    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_collapses_spellings() {
        let a = canonicalize_url("HTTPS://Example.COM:443/Path/?q=1#frag").expect("valid url");
        let b = canonicalize_url("https://example.com/Path?q=1").expect("valid url");
        assert_eq!(a, b);
        assert_eq!(url_hash(&a), url_hash(&b));
    }

    #[test]
    fn root_path_keeps_slash() {
        let c = canonicalize_url("https://example.com").expect("valid url");
        assert_eq!(c, "https://example.com/");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(canonicalize_url("ftp://example.com/file").is_err());
        assert!(!is_valid_url("javascript:void(0)"));
        assert!(!is_valid_url("mailto:a@b.c"));
        assert!(is_valid_url("https://example.com/a"));
    }

    #[test]
    fn href_resolution() {
        let base = Url::parse("https://site.test/list/page").expect("valid base");
        assert_eq!(
            resolve_href(&base, "/p/42").as_deref(),
            Some("https://site.test/p/42")
        );
        assert_eq!(
            resolve_href(&base, "detail?x=1").as_deref(),
            Some("https://site.test/list/detail?x=1")
        );
        assert_eq!(resolve_href(&base, "#top"), None);
        assert_eq!(resolve_href(&base, "javascript:void(0)"), None);
    }
}
