//! Core data models for Dropsearch
//!
//! A `RemoteFile` comes out of a folder listing, becomes an `IndexedDocument`
//! once its text is extracted, and comes back as a `SearchHit` from a query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Snapshot of one file entry from a provider folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// File name including extension; the unique key in the index
    pub name: String,
    /// Lower-cased provider path used for download and link calls
    pub path: String,
    /// Direct-content URL, resolved lazily for files that get indexed
    pub download_url: Option<String>,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            download_url: None,
        }
    }
}

/// A document as stored in the search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub filename: String,
    pub url: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl IndexedDocument {
    pub fn new(filename: impl Into<String>, url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome counts of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Sort direction for the `createdAt` field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("invalid sort order '{}', expected asc or desc", other)),
        }
    }
}

/// Client search input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub sort: Option<SortOrder>,
    /// Requested result count; clamped to the engine's cap
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// One ranked (or browsed) result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub filename: String,
    pub url: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlight: Vec<String>,
}
