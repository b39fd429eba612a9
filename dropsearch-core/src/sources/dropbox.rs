//! Dropbox HTTP API connector
//!
//! Lists a folder, downloads files into the staging directory and derives
//! direct-content URLs from shared links. Every call runs through
//! [`with_auth_retry`].

use super::credentials::{with_auth_retry, CredentialManager};
use super::RemoteStore;
use crate::config::{DEFAULT_DROPBOX_API_URL, DEFAULT_DROPBOX_CONTENT_URL};
use crate::error::{DropsearchError, Result};
use crate::models::RemoteFile;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Host serving the shared-link web viewer
const VIEWER_HOST: &str = "www.dropbox.com";

/// Host serving raw file content for shared links
const DIRECT_CONTENT_HOST: &str = "dl.dropboxusercontent.com";

/// Base URLs of the Dropbox RPC and content hosts
#[derive(Debug, Clone)]
pub struct DropboxEndpoints {
    pub api: String,
    pub content: String,
}

impl Default for DropboxEndpoints {
    fn default() -> Self {
        Self {
            api: DEFAULT_DROPBOX_API_URL.into(),
            content: DEFAULT_DROPBOX_CONTENT_URL.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<Entry>,
    cursor: String,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Entry {
    File {
        name: String,
        path_lower: Option<String>,
    },
    Folder {},
    Deleted {},
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListSharedLinksResponse {
    links: Vec<SharedLink>,
}

/// Dropbox client bound to one credential manager and staging directory
pub struct DropboxClient {
    http: Client,
    endpoints: DropboxEndpoints,
    credentials: Arc<CredentialManager>,
    staging_dir: PathBuf,
}

impl DropboxClient {
    pub fn new(
        http: Client,
        endpoints: DropboxEndpoints,
        credentials: Arc<CredentialManager>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            endpoints: DropboxEndpoints {
                api: endpoints.api.trim_end_matches('/').to_string(),
                content: endpoints.content.trim_end_matches('/').to_string(),
            },
            credentials,
            staging_dir: staging_dir.into(),
        }
    }

    async fn rpc(&self, operation: &str, endpoint: &str, token: &str, body: serde_json::Value) -> Result<Response> {
        let url = format!("{}/2/{}", self.endpoints.api, endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check_status(operation, response).await
    }

    async fn list_once(&self, folder: &str, token: String) -> Result<Vec<RemoteFile>> {
        let response = self
            .rpc("list_folder", "files/list_folder", &token, json!({ "path": folder, "recursive": false }))
            .await?;
        let mut page: ListFolderResponse = parse_json("list_folder", response).await?;

        let mut files = collect_files(page.entries);
        while page.has_more {
            let response = self
                .rpc(
                    "list_folder_continue",
                    "files/list_folder/continue",
                    &token,
                    json!({ "cursor": page.cursor }),
                )
                .await?;
            page = parse_json("list_folder_continue", response).await?;
            files.extend(collect_files(page.entries));
        }

        Ok(files)
    }

    async fn download_once(&self, path: &str, token: String) -> Result<PathBuf> {
        let url = format!("{}/2/files/download", self.endpoints.content);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("Dropbox-API-Arg", header_safe_json(&json!({ "path": path })))
            .send()
            .await?;
        let response = check_status("download", response).await?;
        let bytes = response.bytes().await?;

        let staged = self.stage(path, &bytes).await?;
        info!(path, staged = %staged.display(), size = bytes.len(), "File downloaded");
        Ok(staged)
    }

    /// Write `bytes` next to their final name, then rename into place
    async fn stage(&self, remote_path: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;

        let file_name = staged_file_name(remote_path);
        let target = self.staging_dir.join(&file_name);
        let partial = self
            .staging_dir
            .join(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        Ok(target)
    }

    async fn share_link_once(&self, path: &str, token: String) -> Result<String> {
        let url = format!("{}/2/sharing/create_shared_link_with_settings", self.endpoints.api);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({ "path": path }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            if let Some(existing) = existing_link_url(&body) {
                debug!(path, "Reusing existing shared link");
                return Ok(existing);
            }
            if is_link_conflict(&body) {
                return self.find_existing_link(path, &token).await;
            }
            return Err(DropsearchError::Remote {
                status: StatusCode::CONFLICT.as_u16(),
                message: format!("create_shared_link: {}", body),
            });
        }

        let response = check_status("create_shared_link", response).await?;
        let link: SharedLink = parse_json("create_shared_link", response).await?;
        Ok(link.url)
    }

    async fn find_existing_link(&self, path: &str, token: &str) -> Result<String> {
        let response = self
            .rpc(
                "list_shared_links",
                "sharing/list_shared_links",
                token,
                json!({ "path": path, "direct_only": true }),
            )
            .await?;
        let links: ListSharedLinksResponse = parse_json("list_shared_links", response).await?;
        links
            .links
            .into_iter()
            .next()
            .map(|l| l.url)
            .ok_or_else(|| DropsearchError::Remote {
                status: StatusCode::CONFLICT.as_u16(),
                message: format!("shared link for {} exists but could not be listed", path),
            })
    }
}

#[async_trait]
impl RemoteStore for DropboxClient {
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        let files = with_auth_retry(&self.credentials, "list_folder", move |token| {
            self.list_once(folder, token)
        })
        .await?;
        debug!(folder, count = files.len(), "Listed remote folder");
        Ok(files)
    }

    async fn download(&self, path: &str) -> Result<PathBuf> {
        with_auth_retry(&self.credentials, "download", move |token| {
            self.download_once(path, token)
        })
        .await
    }

    async fn share_link(&self, path: &str) -> Result<String> {
        let url = with_auth_retry(&self.credentials, "create_shared_link", move |token| {
            self.share_link_once(path, token)
        })
        .await?;
        Ok(normalize_shared_link(&url))
    }
}

/// Rewrite a shared link from the web viewer host to the direct-content host
pub fn normalize_shared_link(link: &str) -> String {
    match url::Url::parse(link) {
        Ok(mut parsed) => {
            if parsed.host_str() == Some(VIEWER_HOST) && parsed.set_host(Some(DIRECT_CONTENT_HOST)).is_err() {
                warn!(link, "Could not rewrite shared link host");
            }
            parsed.to_string()
        }
        Err(e) => {
            warn!(link, error = %e, "Shared link is not a valid URL");
            link.replace(VIEWER_HOST, DIRECT_CONTENT_HOST)
        }
    }
}

async fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(DropsearchError::AuthRejected(format!("{}: {}", operation, body)));
    }

    Err(DropsearchError::Remote {
        status: status.as_u16(),
        message: format!("{}: {}", operation, body),
    })
}

async fn parse_json<T: serde::de::DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| DropsearchError::Parse(format!("{} response: {}", operation, e)))
}

fn collect_files(entries: Vec<Entry>) -> Vec<RemoteFile> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::File {
                name,
                path_lower: Some(path),
            } => Some(RemoteFile::new(name, path)),
            _ => None,
        })
        .collect()
}

fn existing_link_url(body: &serde_json::Value) -> Option<String> {
    body.pointer("/error/shared_link_already_exists/metadata/url")
        .and_then(|u| u.as_str())
        .map(String::from)
}

fn is_link_conflict(body: &serde_json::Value) -> bool {
    body.pointer("/error/.tag").and_then(|t| t.as_str()) == Some("shared_link_already_exists")
        || body
            .get("error_summary")
            .and_then(|s| s.as_str())
            .is_some_and(|s| s.starts_with("shared_link_already_exists"))
}

fn staged_file_name(remote_path: &str) -> String {
    Path::new(remote_path)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "..")
        .map(String::from)
        .unwrap_or_else(|| format!("download-{}", Uuid::new_v4()))
}

/// Serialize JSON for an HTTP header, escaping non-ASCII as `\uXXXX`
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
