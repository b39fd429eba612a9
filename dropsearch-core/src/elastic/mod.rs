//! Elasticsearch integration for the document index
//!
//! One index (default `files`) holds one document per filename. Index
//! creation is idempotent; writes never deduplicate on their own, callers
//! check `exists` first.

pub mod query;

use crate::config::ElasticConfig;
use crate::error::{DropsearchError, Result};
use crate::models::{IndexedDocument, SearchHit, SortOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Storage operations the sync pass and the query engine rely on
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Create the index with its analyzers if it does not exist yet
    async fn ensure_index(&self) -> Result<()>;

    /// Whether at least one document has exactly this filename
    async fn exists(&self, filename: &str) -> Result<bool>;

    /// Write one document unconditionally
    async fn put(&self, document: &IndexedDocument) -> Result<()>;

    /// Ranked search or browse; `query` is already trimmed
    async fn query(&self, query: &str, sort: SortOrder, limit: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: HitSource,
    #[serde(default)]
    highlight: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HitSource {
    filename: String,
    url: String,
    text: String,
    created_at: DateTime<Utc>,
}

/// Elasticsearch REST client for one index
pub struct ElasticIndex {
    http: Client,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
    synonyms: Vec<String>,
}

impl ElasticIndex {
    pub fn new(http: Client, config: &ElasticConfig) -> Self {
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            synonyms: config.synonyms.clone(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, self.index, suffix)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn index_exists(&self) -> Result<bool> {
        let response = self
            .authorize(self.http.head(self.url("")))
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(DropsearchError::Index(format!(
                "index existence check for {} returned {}",
                self.index, s
            ))),
        }
    }
}

#[async_trait]
impl DocumentIndex for ElasticIndex {
    async fn ensure_index(&self) -> Result<()> {
        if self.index_exists().await? {
            debug!(index = %self.index, "Index already exists");
            return Ok(());
        }

        info!(index = %self.index, "Creating index");
        let response = self
            .authorize(self.http.put(self.url("")))
            .json(&query::index_definition(&self.synonyms))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // Another process created it between the check and the create.
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            debug!(index = %self.index, "Index created concurrently");
            return Ok(());
        }

        Err(DropsearchError::Index(format!(
            "failed to create index {} ({}): {}",
            self.index, status, body
        )))
    }

    async fn exists(&self, filename: &str) -> Result<bool> {
        let response = self
            .authorize(self.http.post(self.url("/_count")))
            .json(&query::exists_body(filename))
            .send()
            .await?;
        let response = check_status(response, DropsearchError::Index).await?;
        let count: CountResponse = response
            .json()
            .await
            .map_err(|e| DropsearchError::Parse(format!("count response: {}", e)))?;
        Ok(count.count > 0)
    }

    async fn put(&self, document: &IndexedDocument) -> Result<()> {
        // wait_for makes the document visible to the next exists() call
        let response = self
            .authorize(self.http.post(self.url("/_doc?refresh=wait_for")))
            .json(document)
            .send()
            .await
            .map_err(|e| DropsearchError::IndexWrite(e.to_string()))?;
        check_status(response, DropsearchError::IndexWrite).await?;
        debug!(filename = %document.filename, "Document indexed");
        Ok(())
    }

    async fn query(&self, query: &str, sort: SortOrder, limit: usize) -> Result<Vec<SearchHit>> {
        let body = query::search_body(query, sort, limit);
        let response = self
            .authorize(self.http.post(self.url("/_search")))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, DropsearchError::Search).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| DropsearchError::Parse(format!("search response: {}", e)))?;

        let hits: Vec<SearchHit> = parsed
            .hits
            .hits
            .into_iter()
            .map(|mut hit| SearchHit {
                highlight: hit.highlight.remove("text").unwrap_or_default(),
                filename: hit.source.filename,
                url: hit.source.url,
                text: hit.source.text,
                created_at: hit.source.created_at,
                score: hit.score,
            })
            .collect();

        info!(query, result_count = hits.len(), "Search completed");
        Ok(hits)
    }
}

async fn check_status(response: Response, wrap: fn(String) -> DropsearchError) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Elasticsearch request failed");
    Err(wrap(format!("{}: {}", status, body)))
}
