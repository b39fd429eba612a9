//! Sync orchestration
//!
//! One pass lists the remote folder and, for every file not yet in the
//! index, downloads it, extracts its text and writes a document. Per-file
//! failures are counted and logged; only index setup and the initial
//! listing can fail the pass.

pub mod extractors;

pub use extractors::{ContentExtractor, DocumentFormat, TextExtractor};

use crate::elastic::DocumentIndex;
use crate::error::{DropsearchError, Result};
use crate::models::{IndexedDocument, RemoteFile, SyncSummary};
use crate::sources::RemoteStore;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Where the orchestrator currently is within a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    Idle,
    Listing,
    ProcessingFiles,
    Summarizing,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote folder to sync, "" for the root
    pub folder: String,
    /// Files processed concurrently
    pub parallelism: usize,
    /// Keep staged downloads after processing
    pub keep_staged: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folder: String::new(),
            parallelism: 4,
            keep_staged: false,
        }
    }
}

/// Why a file was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    AlreadyIndexed,
    NoContent,
    PassAborted,
}

#[derive(Debug)]
enum FileOutcome {
    Indexed,
    Skipped(SkipReason),
    Failed,
}

/// Per-file pipeline step, recorded with failures
#[derive(Debug, Clone, Copy)]
enum Step {
    Exists,
    Download,
    Extract,
    ShareLink,
    Index,
}

impl Step {
    fn as_str(&self) -> &'static str {
        match self {
            Step::Exists => "exists",
            Step::Download => "download",
            Step::Extract => "extract",
            Step::ShareLink => "share_link",
            Step::Index => "index",
        }
    }
}

/// Async locks keyed by filename, scoped to one pass
#[derive(Default)]
struct FileLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileLocks {
    async fn acquire(&self, filename: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(filename.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// Drives list → extract → index passes
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteStore>,
    extractor: Arc<dyn TextExtractor>,
    index: Arc<dyn DocumentIndex>,
    config: SyncConfig,
    pass_lock: tokio::sync::Mutex<()>,
    state: RwLock<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        extractor: Arc<dyn TextExtractor>,
        index: Arc<dyn DocumentIndex>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            extractor,
            index,
            config: SyncConfig {
                parallelism: config.parallelism.max(1),
                ..config
            },
            pass_lock: tokio::sync::Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() != SyncState::Idle
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Run one pass. Returns `PassInProgress` if another pass holds the lock.
    #[instrument(skip(self), fields(folder = %self.config.folder))]
    pub async fn run_pass(&self) -> Result<SyncSummary> {
        let _pass = self.pass_lock.try_lock().map_err(|_| {
            warn!("Sync pass requested while another pass is running");
            DropsearchError::PassInProgress
        })?;

        let started = Instant::now();
        info!("Starting sync pass");
        let result = self.pass().await;
        self.set_state(SyncState::Idle);

        match &result {
            Ok(summary) => info!(
                total = summary.total,
                processed = summary.processed,
                skipped = summary.skipped,
                errors = summary.errored,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Sync completed"
            ),
            Err(e) => error!(error = %e, step = "sync_process", "Sync failed"),
        }
        result
    }

    async fn pass(&self) -> Result<SyncSummary> {
        self.set_state(SyncState::Listing);
        self.index.ensure_index().await.map_err(|e| {
            error!(error = %e, operation = "ensure_index", "Index setup failed");
            e
        })?;

        let files = self.remote.list(&self.config.folder).await.map_err(|e| {
            error!(error = %e, operation = "list", "Listing remote files failed");
            e
        })?;
        info!(count = files.len(), "Found remote files");

        self.set_state(SyncState::ProcessingFiles);
        let locks = FileLocks::default();
        let abort = AtomicBool::new(false);
        let fatal: Mutex<Option<DropsearchError>> = Mutex::new(None);

        let outcomes: Vec<FileOutcome> = stream::iter(files.iter().cloned())
            .map(|file| {
                let (locks, abort, fatal) = (&locks, &abort, &fatal);
                async move { self.process_guarded(&file, locks, abort, fatal).await }
            })
            .buffer_unordered(self.config.parallelism)
            .collect()
            .await;

        self.set_state(SyncState::Summarizing);
        let mut summary = SyncSummary {
            total: files.len(),
            ..Default::default()
        };
        for outcome in &outcomes {
            match outcome {
                FileOutcome::Indexed => summary.processed += 1,
                FileOutcome::Skipped(SkipReason::PassAborted) => {}
                FileOutcome::Skipped(_) => summary.skipped += 1,
                FileOutcome::Failed => summary.errored += 1,
            }
        }

        if let Some(e) = fatal.lock().take() {
            warn!(
                processed = summary.processed,
                errors = summary.errored,
                "Pass aborted after a credential failure"
            );
            return Err(e);
        }

        Ok(summary)
    }

    async fn process_guarded(
        &self,
        file: &RemoteFile,
        locks: &FileLocks,
        abort: &AtomicBool,
        fatal: &Mutex<Option<DropsearchError>>,
    ) -> FileOutcome {
        if abort.load(Ordering::SeqCst) {
            return FileOutcome::Skipped(SkipReason::PassAborted);
        }

        let _guard = locks.acquire(&file.name).await;
        match self.process_file(file).await {
            Ok(outcome) => outcome,
            Err((step, e)) => {
                error!(
                    filename = %file.name,
                    step = step.as_str(),
                    error = %e,
                    "Failed to process file"
                );
                if !e.is_per_file() {
                    abort.store(true, Ordering::SeqCst);
                    fatal.lock().get_or_insert(e);
                }
                FileOutcome::Failed
            }
        }
    }

    /// exists → download → extract → share link → put, under the file's lock
    async fn process_file(&self, file: &RemoteFile) -> std::result::Result<FileOutcome, (Step, DropsearchError)> {
        let at = |step: Step| move |e: DropsearchError| (step, e);

        if self.index.exists(&file.name).await.map_err(at(Step::Exists))? {
            debug!(filename = %file.name, "Skipping existing file");
            return Ok(FileOutcome::Skipped(SkipReason::AlreadyIndexed));
        }

        let staged = self.remote.download(&file.path).await.map_err(at(Step::Download))?;
        debug!(filename = %file.name, path = %staged.display(), "Extracting text from file");
        let extracted = self.extractor.extract(&staged).await;
        self.discard_staged(&staged).await;
        let text = extracted.map_err(at(Step::Extract))?;

        if text.trim().is_empty() {
            info!(filename = %file.name, "File format not supported or empty");
            return Ok(FileOutcome::Skipped(SkipReason::NoContent));
        }

        let url = match &file.download_url {
            Some(url) => url.clone(),
            None => self.remote.share_link(&file.path).await.map_err(at(Step::ShareLink))?,
        };

        info!(filename = %file.name, "Indexing new file");
        let document = IndexedDocument::new(&file.name, url, text);
        self.index.put(&document).await.map_err(at(Step::Index))?;
        Ok(FileOutcome::Indexed)
    }

    async fn discard_staged(&self, staged: &Path) {
        if self.config.keep_staged {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(staged).await {
            warn!(path = %staged.display(), error = %e, "Failed to remove staged file");
        }
    }
}
