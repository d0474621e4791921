//! NewsWire-B: a `top headlines` endpoint returning an `articles` array.
//!
//! ```text
//! GET /api/v4/top-headlines?apikey=..&category=business&lang=en&country=us&max=10
//! {"totalArticles": 2, "articles": [{"title", "description", "url", "image",
//!   "publishedAt": "2026-03-01T08:30:00Z", "source": {"name", "url"}}]}
//! ```

use newsgate_core::{CandidateArticle, Provider, UrlCanonicalizer};
use reqwest::Url;
use serde::Deserialize;

use crate::adapter::WireFormat;
use crate::error::SchemaError;
use crate::types::{non_blank, parse_timestamp, FetchParams};

const DEFAULT_BASE_URL: &str = "https://gnews.io/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    articles: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    image: Option<String>,
    published_at: Option<String>,
    source: Option<Source>,
}

#[derive(Debug, Deserialize)]
struct Source {
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewswireB;

impl NewswireB {
    fn category(topic: &str) -> &str {
        match topic {
            "top" | "headlines" => "general",
            "politics" => "nation",
            "business" | "technology" | "science" | "health" | "world" | "sports"
            | "entertainment" => topic,
            _ => "general",
        }
    }
}

impl WireFormat for NewswireB {
    fn provider(&self) -> Provider {
        Provider::NewswireB
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn request_url(&self, base_url: &Url, api_key: &str, params: &FetchParams) -> Url {
        let mut url = base_url.clone();
        url.set_path("api/v4/top-headlines");
        url.query_pairs_mut()
            .append_pair("apikey", api_key)
            .append_pair("category", Self::category(&params.topic))
            .append_pair("lang", &params.language)
            .append_pair("country", &params.region)
            .append_pair("max", &params.max_results.to_string());
        url
    }

    fn parse(
        &self,
        body: &str,
        canonicalizer: &UrlCanonicalizer,
    ) -> Result<Vec<CandidateArticle>, SchemaError> {
        let schema_error = |reason: String| SchemaError {
            provider: Provider::NewswireB,
            reason,
        };

        let envelope: Envelope =
            serde_json::from_str(body).map_err(|e| schema_error(e.to_string()))?;
        if let Some(errors) = envelope.errors {
            return Err(schema_error(format!("provider reported errors: {errors}")));
        }
        let items = envelope
            .articles
            .ok_or_else(|| schema_error("missing `articles`".to_string()))?;

        let total = items.len();
        let articles: Vec<CandidateArticle> = items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<Item>(v).ok())
            .filter_map(|item| normalize(item, canonicalizer))
            .collect();

        if articles.len() < total {
            tracing::debug!(
                provider = %Provider::NewswireB,
                dropped = total - articles.len(),
                "dropped unusable items"
            );
        }
        Ok(articles)
    }
}

fn normalize(item: Item, canonicalizer: &UrlCanonicalizer) -> Option<CandidateArticle> {
    let title = non_blank(item.title)?;
    let url = canonicalizer.canonicalize(item.url.as_deref()?)?;
    Some(CandidateArticle {
        title,
        description: non_blank(item.description),
        url,
        image_url: non_blank(item.image),
        published_at: item.published_at.as_deref().and_then(parse_timestamp),
        source_name: item.source.and_then(|s| non_blank(s.name)),
        provider: Provider::NewswireB,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<Vec<CandidateArticle>, SchemaError> {
        NewswireB.parse(body, &UrlCanonicalizer::default())
    }

    #[test]
    fn request_url_maps_topic_to_category() {
        let base = Url::parse("https://gnews.io/").unwrap();
        let params = FetchParams {
            region: "gb".to_string(),
            topic: "politics".to_string(),
            language: "en".to_string(),
            max_results: 10,
        };
        let url = NewswireB.request_url(&base, "k1", &params);
        assert_eq!(
            url.as_str(),
            "https://gnews.io/api/v4/top-headlines?apikey=k1&category=nation&lang=en&country=gb&max=10"
        );
    }

    #[test]
    fn normalizes_items() {
        let body = serde_json::json!({
            "totalArticles": 2,
            "articles": [
                {
                    "title": "Chipmaker beats forecasts",
                    "description": "Revenue up 40%.",
                    "url": "https://tech.example.com/chips#top",
                    "image": "https://img.example.com/c.png",
                    "publishedAt": "2026-03-01T08:30:00Z",
                    "source": {"name": "Tech Example", "url": "https://tech.example.com"}
                },
                { "title": "Broken", "url": "mailto:someone@example.com" }
            ]
        })
        .to_string();

        let articles = parse(&body).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://tech.example.com/chips");
        assert_eq!(articles[0].source_name.as_deref(), Some("Tech Example"));
        assert_eq!(articles[0].image_url.as_deref(), Some("https://img.example.com/c.png"));
    }

    #[test]
    fn errors_field_is_a_schema_error() {
        assert!(parse(r#"{"errors":["You have reached your request limit"]}"#).is_err());
    }

    #[test]
    fn missing_articles_is_a_schema_error() {
        assert!(parse(r#"{"totalArticles": 0}"#).is_err());
        assert!(parse(r#"{"articles": "nope"}"#).is_err());
    }
}
