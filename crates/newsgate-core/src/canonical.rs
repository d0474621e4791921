//! URL canonicalization and hashing.
//!
//! The canonical form is the dedup key basis for every coordination-store
//! marker, so two URLs that point at the same article must collapse to the
//! same string here.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that never identify content.
const TRACKING_PARAMS: [&str; 18] = [
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src",
    "cmpid", "ocid", "smid", "_ga", "_gl", "yclid", "spm", "guccounter", "cid",
];

/// Canonicalizes article URLs.
///
/// On most domains the whole query string is dropped. Domains listed in
/// `query_domains` (subdomains included) carry meaningful parameters such as
/// article ids, so only tracking parameters are removed there and the rest
/// are kept in sorted order.
#[derive(Debug, Clone, Default)]
pub struct UrlCanonicalizer {
    query_domains: Vec<String>,
}

impl UrlCanonicalizer {
    #[must_use]
    pub fn new(query_domains: &[String]) -> Self {
        Self {
            query_domains: query_domains
                .iter()
                .map(|d| d.trim().trim_start_matches("www.").to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Returns the canonical form of `raw`, or `None` if it is not an
    /// absolute http(s) URL.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let mut url = Url::parse(raw.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        url.host_str()?;

        url.set_fragment(None);

        let keep_query = url
            .host_str()
            .is_some_and(|host| self.preserves_query(host));
        if keep_query {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !is_tracking_param(k))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();
            if pairs.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(pairs);
            }
        } else {
            url.set_query(None);
        }

        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }

        Some(url.to_string())
    }

    fn preserves_query(&self, host: &str) -> bool {
        let host = host.trim_start_matches("www.");
        self.query_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

/// Canonicalizes `raw` with no query-preserving domains.
#[must_use]
pub fn canonicalize_url(raw: &str) -> Option<String> {
    UrlCanonicalizer::default().canonicalize(raw)
}

/// Hex SHA-256 of a canonical URL, used as the coordination-store key suffix.
#[must_use]
pub fn url_hash(canonical_url: &str) -> String {
    let digest = Sha256::digest(canonical_url.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Lowercased host of `url` without a leading `www.`.
#[must_use]
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_params_and_trailing_slash_collapse() {
        let a = canonicalize_url("https://news.example.com/world/story-1/?utm_source=x&fbclid=abc")
            .unwrap();
        let b = canonicalize_url("https://news.example.com/world/story-1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "https://news.example.com/world/story-1");
    }

    #[test]
    fn fragment_is_dropped_and_host_lowercased() {
        let url = canonicalize_url("https://News.Example.COM/a#comments").unwrap();
        assert_eq!(url, "https://news.example.com/a");
    }

    #[test]
    fn root_path_keeps_single_slash() {
        assert_eq!(
            canonicalize_url("https://example.com/").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn meaningful_query_kept_on_allow_listed_domain() {
        let canon = UrlCanonicalizer::new(&["news.ycombinator.com".to_string()]);
        let url = canon
            .canonicalize("https://news.ycombinator.com/item?utm_medium=rss&id=42")
            .unwrap();
        assert_eq!(url, "https://news.ycombinator.com/item?id=42");
    }

    #[test]
    fn allow_list_matches_subdomains_and_sorts_params() {
        let canon = UrlCanonicalizer::new(&["example.org".to_string()]);
        let url = canon
            .canonicalize("https://www.m.example.org/read?page=2&aid=7&gclid=z")
            .unwrap();
        assert_eq!(url, "https://www.m.example.org/read?aid=7&page=2");
    }

    #[test]
    fn query_dropped_on_other_domains() {
        let canon = UrlCanonicalizer::new(&["example.org".to_string()]);
        let url = canon
            .canonicalize("https://example.com/read?aid=7")
            .unwrap();
        assert_eq!(url, "https://example.com/read");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(canonicalize_url("ftp://example.com/file").is_none());
        assert!(canonicalize_url("not a url").is_none());
    }

    #[test]
    fn url_hash_is_stable_hex() {
        let h1 = url_hash("https://example.com/a");
        let h2 = url_hash("https://example.com/a");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, url_hash("https://example.com/b"));
    }

    #[test]
    fn domain_of_strips_www() {
        assert_eq!(
            domain_of("https://www.Example.com/x").as_deref(),
            Some("example.com")
        );
    }
}
