use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// An upstream API whose credentials and availability are managed by the
/// key pool and circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    NewswireA,
    NewswireB,
    /// The AI-analysis collaborator; pooled and circuit-protected like a news API.
    Analysis,
}

impl Provider {
    /// Stable identifier used in coordination-store keys and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::NewswireA => "newswire_a",
            Provider::NewswireB => "newswire_b",
            Provider::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newswire_a" => Ok(Provider::NewswireA),
            "newswire_b" => Ok(Provider::NewswireB),
            "analysis" => Ok(Provider::Analysis),
            other => Err(ConfigError::Validation(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

/// A normalized article candidate, transient between fetch and hand-off.
///
/// `url` is always canonical (see [`crate::canonicalize_url`]) and is the
/// dedup key basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateArticle {
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: Option<String>,
    pub provider: Provider,
}

impl CandidateArticle {
    /// Title and description joined for classification and analysis.
    #[must_use]
    pub fn combined_text(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => format!("{}\n\n{desc}", self.title.trim()),
            _ => self.title.trim().to_string(),
        }
    }
}

/// Coarse topical category assigned by the gatekeeper or the analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Politics,
    Business,
    Technology,
    Science,
    Health,
    World,
    Sports,
    Entertainment,
    Lifestyle,
    General,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Politics => "politics",
            Category::Business => "business",
            Category::Technology => "technology",
            Category::Science => "science",
            Category::Health => "health",
            Category::World => "world",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
            Category::Lifestyle => "lifestyle",
            Category::General => "general",
        }
    }

    /// Lenient parse used on AI output; unknown labels map to `General`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "politics" => Category::Politics,
            "business" | "economy" | "finance" => Category::Business,
            "technology" | "tech" => Category::Technology,
            "science" => Category::Science,
            "health" => Category::Health,
            "world" | "international" => Category::World,
            "sports" | "sport" => Category::Sports,
            "entertainment" => Category::Entertainment,
            "lifestyle" => Category::Lifestyle,
            _ => Category::General,
        }
    }
}

/// Depth of downstream AI analysis recommended for an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Full,
    Basic,
}

impl AnalysisMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::Full => "full",
            AnalysisMode::Basic => "basic",
        }
    }
}

/// Output of the AI-analysis collaborator's `analyze` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: Category,
    /// Political/editorial lean in [-1.0, 1.0].
    pub bias_score: f32,
    /// Source credibility in [0.0, 1.0].
    pub credibility_score: f32,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Output of the AI-analysis collaborator's classification-only call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunkVerdict {
    pub is_junk: bool,
    pub category: Category,
    pub recommended_mode: AnalysisMode,
}

/// An analyzed article as written to the persistent content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedArticle {
    pub candidate: CandidateArticle,
    pub analysis: AnalysisResult,
    pub mode: AnalysisMode,
    pub embedding: Option<Vec<f32>>,
    pub analyzed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(description: Option<&str>) -> CandidateArticle {
        CandidateArticle {
            title: " Markets rally ".to_string(),
            description: description.map(str::to_string),
            url: "https://example.com/a".to_string(),
            image_url: None,
            published_at: None,
            source_name: None,
            provider: Provider::NewswireA,
        }
    }

    #[test]
    fn provider_round_trips_through_str() {
        for p in [Provider::NewswireA, Provider::NewswireB, Provider::Analysis] {
            assert_eq!(p.as_str().parse::<Provider>().unwrap(), p);
        }
    }

    #[test]
    fn provider_parse_rejects_unknown() {
        assert!("reuters".parse::<Provider>().is_err());
    }

    #[test]
    fn combined_text_joins_title_and_description() {
        assert_eq!(
            candidate(Some("Stocks closed higher.")).combined_text(),
            "Markets rally\n\nStocks closed higher."
        );
    }

    #[test]
    fn combined_text_ignores_blank_description() {
        assert_eq!(candidate(Some("   ")).combined_text(), "Markets rally");
        assert_eq!(candidate(None).combined_text(), "Markets rally");
    }

    #[test]
    fn category_from_label_is_lenient() {
        assert_eq!(Category::from_label("Tech"), Category::Technology);
        assert_eq!(Category::from_label("FINANCE"), Category::Business);
        assert_eq!(Category::from_label("astrology"), Category::General);
    }

    #[test]
    fn category_labels_round_trip() {
        for c in [Category::Politics, Category::Lifestyle, Category::General] {
            assert_eq!(Category::from_label(c.as_str()), c);
        }
    }
}
