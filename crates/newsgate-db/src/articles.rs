//! Persistent content store for analyzed articles.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsgate_core::{url_hash, AnalyzedArticle, ArticleStore};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `articles` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleRow {
    pub id: i64,
    pub public_id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub source_name: Option<String>,
    pub provider: String,
    pub published_at: Option<DateTime<Utc>>,
    pub category: String,
    pub analysis_mode: String,
    pub bias_score: f32,
    pub credibility_score: f32,
    pub summary: String,
    pub key_points: Json<Vec<String>>,
    pub embedding: Option<Vec<f32>>,
    pub analyzed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fetches one article by canonical URL.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_article_by_url(pool: &PgPool, url: &str) -> Result<Option<ArticleRow>, DbError> {
    let row = sqlx::query_as::<_, ArticleRow>(
        "SELECT id, public_id, url, url_hash, title, description, image_url, source_name, \
                provider, published_at, category, analysis_mode, bias_score, credibility_score, \
                summary, key_points, embedding, analyzed_at, created_at \
         FROM articles WHERE url = $1",
    )
    .bind(url)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Clone)]
pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Subset of `urls` already stored, in one query.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the query fails.
    pub async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, DbError> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_scalar::<_, String>("SELECT url FROM articles WHERE url = ANY($1)")
            .bind(urls)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// Inserts an analyzed article. Returns `false` if the URL was already stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the insert fails.
    pub async fn insert_article(&self, article: &AnalyzedArticle) -> Result<bool, DbError> {
        let candidate = &article.candidate;
        let analysis = &article.analysis;

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO articles ( \
                 public_id, url, url_hash, title, description, image_url, source_name, \
                 provider, published_at, category, analysis_mode, bias_score, \
                 credibility_score, summary, key_points, embedding, analyzed_at \
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             ON CONFLICT (url) DO NOTHING \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&candidate.url)
        .bind(url_hash(&candidate.url))
        .bind(&candidate.title)
        .bind(candidate.description.as_deref())
        .bind(candidate.image_url.as_deref())
        .bind(candidate.source_name.as_deref())
        .bind(candidate.provider.as_str())
        .bind(candidate.published_at)
        .bind(analysis.category.as_str())
        .bind(article.mode.as_str())
        .bind(analysis.bias_score)
        .bind(analysis.credibility_score)
        .bind(&analysis.summary)
        .bind(Json(&analysis.key_points))
        .bind(article.embedding.as_deref())
        .bind(article.analyzed_at)
        .fetch_optional(&self.pool)
        .await?;

        if id.is_none() {
            tracing::debug!(url = %candidate.url, "article already stored");
        }
        Ok(id.is_some())
    }
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn exists_by_url(&self, urls: &[String]) -> anyhow::Result<HashSet<String>> {
        Ok(self.existing_urls(urls).await?)
    }

    async fn insert(&self, article: &AnalyzedArticle) -> anyhow::Result<bool> {
        Ok(self.insert_article(article).await?)
    }
}
