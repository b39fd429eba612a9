//! Source connectors for remote storage providers

pub mod credentials;
pub mod dropbox;

pub use credentials::{with_auth_retry, Credential, CredentialManager};
pub use dropbox::{normalize_shared_link, DropboxClient, DropboxEndpoints};

use crate::error::Result;
use crate::models::RemoteFile;
use async_trait::async_trait;
use std::path::PathBuf;

/// Operations the sync pass needs from a remote provider
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Files directly inside `folder` (one level, no recursion)
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>>;

    /// Download `path` into the staging area and return the staged file.
    ///
    /// The staged file is either complete or absent.
    async fn download(&self, path: &str) -> Result<PathBuf>;

    /// Direct-content URL for `path`, creating a shared link if needed
    async fn share_link(&self, path: &str) -> Result<String>;
}
