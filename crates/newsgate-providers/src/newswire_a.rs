//! NewsWire-A: a `latest news` endpoint returning a `results` array.
//!
//! ```text
//! GET /api/1/latest?apikey=..&country=us&category=business&language=en&size=10
//! {"status": "success", "totalResults": 2, "results": [{"title", "link",
//!   "description", "image_url", "pubDate": "2026-03-01 08:30:00",
//!   "source_id", "source_name"}]}
//! ```

use newsgate_core::{CandidateArticle, Provider, UrlCanonicalizer};
use reqwest::Url;
use serde::Deserialize;

use crate::adapter::WireFormat;
use crate::error::SchemaError;
use crate::types::{non_blank, parse_timestamp, FetchParams};

const DEFAULT_BASE_URL: &str = "https://newsdata.io/";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    results: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source_id: Option<String>,
    source_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewswireA;

impl NewswireA {
    fn category(topic: &str) -> &str {
        match topic {
            "general" | "headlines" => "top",
            other => other,
        }
    }
}

impl WireFormat for NewswireA {
    fn provider(&self) -> Provider {
        Provider::NewswireA
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn request_url(&self, base_url: &Url, api_key: &str, params: &FetchParams) -> Url {
        let mut url = base_url.clone();
        url.set_path("api/1/latest");
        url.query_pairs_mut()
            .append_pair("apikey", api_key)
            .append_pair("country", &params.region)
            .append_pair("category", Self::category(&params.topic))
            .append_pair("language", &params.language)
            .append_pair("size", &params.max_results.to_string());
        url
    }

    fn parse(
        &self,
        body: &str,
        canonicalizer: &UrlCanonicalizer,
    ) -> Result<Vec<CandidateArticle>, SchemaError> {
        let schema_error = |reason: String| SchemaError {
            provider: Provider::NewswireA,
            reason,
        };

        let envelope: Envelope =
            serde_json::from_str(body).map_err(|e| schema_error(e.to_string()))?;
        if envelope.status != "success" {
            let message = envelope
                .results
                .as_ref()
                .and_then(|r| r.get("message"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            return Err(schema_error(format!("status '{}': {message}", envelope.status)));
        }
        let Some(serde_json::Value::Array(items)) = envelope.results else {
            return Err(schema_error("`results` is not an array".to_string()));
        };

        let total = items.len();
        let articles: Vec<CandidateArticle> = items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<Item>(v).ok())
            .filter_map(|item| normalize(item, canonicalizer))
            .collect();

        if articles.len() < total {
            tracing::debug!(
                provider = %Provider::NewswireA,
                dropped = total - articles.len(),
                "dropped unusable items"
            );
        }
        Ok(articles)
    }
}

fn normalize(item: Item, canonicalizer: &UrlCanonicalizer) -> Option<CandidateArticle> {
    let title = non_blank(item.title)?;
    let url = canonicalizer.canonicalize(item.link.as_deref()?)?;
    Some(CandidateArticle {
        title,
        description: non_blank(item.description),
        url,
        image_url: non_blank(item.image_url),
        published_at: item.pub_date.as_deref().and_then(parse_timestamp),
        source_name: non_blank(item.source_name).or_else(|| non_blank(item.source_id)),
        provider: Provider::NewswireA,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<Vec<CandidateArticle>, SchemaError> {
        NewswireA.parse(body, &UrlCanonicalizer::default())
    }

    #[test]
    fn request_url_carries_slot_params() {
        let base = Url::parse("https://newsdata.io/").unwrap();
        let params = FetchParams {
            region: "us".to_string(),
            topic: "general".to_string(),
            language: "en".to_string(),
            max_results: 10,
        };
        let url = NewswireA.request_url(&base, "k1", &params);
        assert_eq!(
            url.as_str(),
            "https://newsdata.io/api/1/latest?apikey=k1&country=us&category=top&language=en&size=10"
        );
    }

    #[test]
    fn normalizes_items_and_drops_unusable_ones() {
        let body = serde_json::json!({
            "status": "success",
            "totalResults": 4,
            "results": [
                {
                    "title": " Storm hits coast ",
                    "link": "https://news.example.com/storm/?utm_source=feed",
                    "description": "Thousands without power.",
                    "image_url": "https://img.example.com/1.jpg",
                    "pubDate": "2026-03-01 08:30:00",
                    "source_id": "examplenews"
                },
                { "title": "", "link": "https://news.example.com/blank" },
                { "title": "No link" },
                { "title": 42, "link": "https://news.example.com/bad-type" }
            ]
        })
        .to_string();

        let articles = parse(&body).unwrap();
        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.title, "Storm hits coast");
        assert_eq!(a.url, "https://news.example.com/storm");
        assert_eq!(a.source_name.as_deref(), Some("examplenews"));
        assert!(a.published_at.is_some());
        assert_eq!(a.provider, Provider::NewswireA);
    }

    #[test]
    fn error_status_is_a_schema_error() {
        let body = r#"{"status":"error","results":{"message":"API key invalid","code":"Unauthorized"}}"#;
        let err = parse(body).unwrap_err();
        assert!(err.reason.contains("API key invalid"));
    }

    #[test]
    fn non_array_results_is_a_schema_error() {
        assert!(parse(r#"{"status":"success","results":{}}"#).is_err());
        assert!(parse("<html>gateway</html>").is_err());
    }
}
