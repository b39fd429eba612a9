//! # Dropsearch Core
//!
//! Keeps a Dropbox folder searchable. A sync pass lists the folder, pulls
//! every file that is not indexed yet, extracts its text and writes it to
//! Elasticsearch; the search engine answers fuzzy and filename-pattern
//! queries over the result.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Dropsearch Core                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────────┐  │
//! │  │ Scheduler   │──▶│ Orchestrator │──▶│ Elastic index     │  │
//! │  │ (interval)  │   │ (indexer)    │   │ ensure/exists/put │  │
//! │  └─────────────┘   └──────┬───────┘   └─────────▲─────────┘  │
//! │                           │                     │            │
//! │            ┌──────────────┼─────────────┐       │            │
//! │            ▼              ▼             │  ┌────┴─────────┐  │
//! │  ┌──────────────┐  ┌─────────────┐      │  │ SearchEngine │  │
//! │  │ Dropbox      │  │ Extractors  │      │  └──────────────┘  │
//! │  │ list/download│  │ text/docx/  │      │                    │
//! │  │ share link   │  │ pdf worker  │      │                    │
//! │  └──────┬───────┘  └─────────────┘      │                    │
//! │         ▼                               │                    │
//! │  ┌──────────────┐                       │                    │
//! │  │ Credentials  │ refresh-token grant   │                    │
//! │  └──────────────┘                       │                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dropsearch_core::{Dropsearch, DropsearchConfig, SearchRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Dropsearch::with_config(DropsearchConfig::from_env()?)?;
//!
//!     let summary = app.sync_once().await?;
//!     println!("indexed {} new files", summary.processed);
//!
//!     let hits = app.search(&SearchRequest::new("invoice")).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod elastic;
pub mod error;
pub mod indexer;
pub mod models;
pub mod scheduler;
pub mod search;
pub mod sources;

pub use config::{DropboxConfig, DropsearchConfig, ElasticConfig, ExtractionConfig};
pub use elastic::{DocumentIndex, ElasticIndex};
pub use error::{DropsearchError, Result};
pub use indexer::{ContentExtractor, SyncConfig, SyncOrchestrator, SyncState, TextExtractor};
pub use models::*;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
pub use search::SearchEngine;
pub use sources::{Credential, CredentialManager, DropboxClient, DropboxEndpoints, RemoteStore};

use chrono::Utc;
use std::sync::Arc;

/// Components wired together once at startup
pub struct Dropsearch {
    orchestrator: Arc<SyncOrchestrator>,
    search: Arc<SearchEngine>,
    config: DropsearchConfig,
}

impl Dropsearch {
    /// Build every component from configuration
    pub fn with_config(config: DropsearchConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.staging_dir)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("dropsearch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DropsearchError::Config(format!("HTTP client: {}", e)))?;

        let dropbox = &config.dropbox;
        let credential = match &dropbox.access_token {
            Some(token) => {
                let expires_at = crate::config::chrono_secs(dropbox.token_ttl_secs)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| {
                        DropsearchError::Config("DROPBOX_TOKEN_TTL_SECS is out of range".into())
                    })?;
                Credential::new(token, &dropbox.refresh_token, expires_at)
            }
            None => Credential::refresh_only(&dropbox.refresh_token),
        };
        let buffer = crate::config::chrono_secs(dropbox.token_buffer_secs).ok_or_else(|| {
            DropsearchError::Config("DROPBOX_TOKEN_BUFFER_SECS is out of range".into())
        })?;
        let credentials = Arc::new(CredentialManager::new(
            http.clone(),
            &dropbox.oauth_url,
            &dropbox.app_key,
            &dropbox.app_secret,
            credential,
            buffer,
        ));

        let remote: Arc<dyn RemoteStore> = Arc::new(DropboxClient::new(
            http.clone(),
            DropboxEndpoints {
                api: dropbox.api_url.clone(),
                content: dropbox.content_url.clone(),
            },
            credentials.clone(),
            config.staging_dir.clone(),
        ));
        let extractor: Arc<dyn TextExtractor> = Arc::new(ContentExtractor::new(&config.extraction));
        let index: Arc<dyn DocumentIndex> = Arc::new(ElasticIndex::new(http, &config.elastic));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            remote,
            extractor,
            index.clone(),
            SyncConfig {
                folder: dropbox.folder.clone(),
                parallelism: config.sync_parallelism,
                keep_staged: config.keep_staged,
            },
        ));
        let search = Arc::new(SearchEngine::new(index, config.max_results));

        Ok(Self {
            orchestrator,
            search,
            config,
        })
    }

    pub fn config(&self) -> &DropsearchConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn search_engine(&self) -> Arc<SearchEngine> {
        self.search.clone()
    }

    /// Run one sync pass now
    pub async fn sync_once(&self) -> Result<SyncSummary> {
        self.orchestrator.run_pass().await
    }

    /// Search the index
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.search.search(request).await
    }

    /// A scheduler for periodic passes at the configured interval (not started)
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.orchestrator.clone(),
            SchedulerConfig {
                interval_secs: self.config.sync_interval_secs,
            },
        )
    }
}
