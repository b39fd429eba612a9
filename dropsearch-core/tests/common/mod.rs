//! In-memory stand-ins for the provider, extractor and index

#![allow(dead_code)]

use async_trait::async_trait;
use dropsearch_core::{
    DocumentIndex, DropsearchError, IndexedDocument, RemoteFile, RemoteStore, Result, SearchHit,
    SortOrder, TextExtractor,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Index backed by a vector, counting calls
#[derive(Default)]
pub struct MemoryIndex {
    docs: Mutex<Vec<IndexedDocument>>,
    puts: Mutex<HashMap<String, usize>>,
    pub ensure_calls: AtomicUsize,
    pub fail_ensure: AtomicBool,
    /// Widens the window between exists() and put() to expose races
    pub exists_delay: Option<Duration>,
    pub last_query: Mutex<Option<(String, SortOrder, usize)>>,
}

impl MemoryIndex {
    pub fn with_exists_delay(delay: Duration) -> Self {
        Self {
            exists_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn put_count(&self, filename: &str) -> usize {
        self.puts.lock().get(filename).copied().unwrap_or(0)
    }

    pub fn total_puts(&self) -> usize {
        self.puts.lock().values().sum()
    }

    pub fn seed(&self, document: IndexedDocument) {
        self.docs.lock().push(document);
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn ensure_index(&self) -> Result<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ensure.load(Ordering::SeqCst) {
            return Err(DropsearchError::Index("cluster unavailable".into()));
        }
        Ok(())
    }

    async fn exists(&self, filename: &str) -> Result<bool> {
        if let Some(delay) = self.exists_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.docs.lock().iter().any(|d| d.filename == filename))
    }

    async fn put(&self, document: &IndexedDocument) -> Result<()> {
        *self.puts.lock().entry(document.filename.clone()).or_default() += 1;
        self.docs.lock().push(document.clone());
        Ok(())
    }

    async fn query(&self, query: &str, sort: SortOrder, limit: usize) -> Result<Vec<SearchHit>> {
        *self.last_query.lock() = Some((query.to_string(), sort, limit));

        let needle = query.to_lowercase();
        let mut docs: Vec<IndexedDocument> = self
            .docs
            .lock()
            .iter()
            .filter(|d| {
                needle.is_empty()
                    || d.filename.to_lowercase().contains(&needle)
                    || d.text.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.created_at);
        if sort == SortOrder::Desc {
            docs.reverse();
        }

        Ok(docs
            .into_iter()
            .take(limit)
            .map(|d| SearchHit {
                filename: d.filename,
                url: d.url,
                text: d.text,
                created_at: d.created_at,
                score: None,
                highlight: vec![],
            })
            .collect())
    }
}

/// Remote folder whose file contents live in memory
pub struct FakeRemote {
    files: Vec<RemoteFile>,
    contents: HashMap<String, Vec<u8>>,
    staging: PathBuf,
    pub list_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub share_calls: AtomicUsize,
    pub fail_list: AtomicBool,
    pub list_delay: Option<Duration>,
    /// Paths whose download fails with the given error constructor
    pub failing_downloads: Mutex<HashMap<String, fn() -> DropsearchError>>,
}

impl FakeRemote {
    pub fn new(staging: &Path, files: &[(&str, &str)]) -> Self {
        let mut listed = Vec::new();
        let mut contents = HashMap::new();
        for (name, body) in files {
            let path = format!("/{}", name.to_lowercase());
            listed.push(RemoteFile::new(*name, path.clone()));
            contents.insert(path, body.as_bytes().to_vec());
        }
        Self {
            files: listed,
            contents,
            staging: staging.to_path_buf(),
            list_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            share_calls: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
            list_delay: None,
            failing_downloads: Mutex::new(HashMap::new()),
        }
    }

    /// List `name` with its direct-content URL already resolved
    pub fn with_download_url(mut self, name: &str, url: &str) -> Self {
        for file in self.files.iter_mut().filter(|f| f.name == name) {
            file.download_url = Some(url.to_string());
        }
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn fail_download(&self, path: &str, error: fn() -> DropsearchError) {
        self.failing_downloads.lock().insert(path.to_string(), error);
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn list(&self, _folder: &str) -> Result<Vec<RemoteFile>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(DropsearchError::Transport("connection reset".into()));
        }
        Ok(self.files.clone())
    }

    async fn download(&self, path: &str) -> Result<PathBuf> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failing_downloads.lock().get(path).copied();
        if let Some(make_error) = failure {
            return Err(make_error());
        }
        let body = self
            .contents
            .get(path)
            .ok_or_else(|| DropsearchError::Remote {
                status: 409,
                message: format!("path/not_found: {}", path),
            })?;
        let staged = self.staging.join(path.trim_start_matches('/'));
        tokio::fs::write(&staged, body).await?;
        Ok(staged)
    }

    async fn share_link(&self, path: &str) -> Result<String> {
        self.share_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://dl.dropboxusercontent.com/s/test{}", path))
    }
}

/// Reads staged files as text, failing for chosen file names
#[derive(Default)]
pub struct FakeExtractor {
    failing: HashSet<String>,
}

impl FakeExtractor {
    pub fn failing_for(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if self.failing.contains(&name) {
            return Err(DropsearchError::Extraction(format!("corrupt file {}", name)));
        }
        Ok(tokio::fs::read_to_string(path).await?)
    }
}
