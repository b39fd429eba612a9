//! Client-facing search over the document index

use crate::elastic::DocumentIndex;
use crate::error::Result;
use crate::models::{SearchHit, SearchRequest};
use std::sync::Arc;
use tracing::debug;

/// Default cap on results per request
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Turns client requests into bounded index queries
pub struct SearchEngine {
    index: Arc<dyn DocumentIndex>,
    max_results: usize,
}

impl SearchEngine {
    pub fn new(index: Arc<dyn DocumentIndex>, max_results: usize) -> Self {
        Self {
            index,
            max_results: max_results.max(1),
        }
    }

    /// Run a search. An empty (after trimming) query browses all documents
    /// by `createdAt`; anything else is a ranked search.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let query = request.query.trim();
        let sort = request.sort.unwrap_or_default();
        let limit = request
            .limit
            .map(|l| l.clamp(1, self.max_results))
            .unwrap_or(self.max_results);

        debug!(query, %sort, limit, "Processing search request");
        let mut hits = self.index.query(query, sort, limit).await?;
        hits.truncate(limit);
        Ok(hits)
    }
}
