//! OAuth2 access/refresh token ownership for the storage provider
//!
//! The `CredentialManager` is the only holder of the token pair. Callers get
//! a usable access token through [`CredentialManager::ensure_fresh`]; remote
//! calls go through [`with_auth_retry`] so a rejected token is refreshed and
//! the call retried exactly once.

use crate::error::{DropsearchError, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Access/refresh token pair with its expiry
#[derive(Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// A credential that holds only a refresh token; first use refreshes
    pub fn refresh_only(refresh_token: impl Into<String>) -> Self {
        Self::new(String::new(), refresh_token, DateTime::<Utc>::UNIX_EPOCH)
    }

    fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.access_token.is_empty()
            || now
                .checked_add_signed(buffer)
                .map_or(true, |deadline| deadline >= self.expires_at)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response from the provider's token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Owns and renews the provider credential
pub struct CredentialManager {
    http: Client,
    token_url: String,
    app_key: String,
    app_secret: String,
    buffer: Duration,
    credential: RwLock<Credential>,
    refresh_count: AtomicU64,
}

impl CredentialManager {
    /// `oauth_url` is the provider's OAuth host; the token path is appended.
    pub fn new(
        http: Client,
        oauth_url: &str,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        credential: Credential,
        buffer: Duration,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth2/token", oauth_url.trim_end_matches('/')),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            buffer,
            credential: RwLock::new(credential),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Return an access token valid for at least the refresh buffer.
    ///
    /// Concurrent callers that all see an expiring token queue on the write
    /// lock; only the first performs the exchange, the rest re-check and
    /// reuse its result.
    pub async fn ensure_fresh(&self) -> Result<String> {
        {
            let credential = self.credential.read().await;
            if !credential.needs_refresh(Utc::now(), self.buffer) {
                return Ok(credential.access_token.clone());
            }
        }

        let mut credential = self.credential.write().await;
        if !credential.needs_refresh(Utc::now(), self.buffer) {
            debug!("Token refreshed by another caller, reusing it");
            return Ok(credential.access_token.clone());
        }

        let refreshed = self.exchange(&credential.refresh_token).await?;
        *credential = refreshed;
        Ok(credential.access_token.clone())
    }

    /// Mark the current token as expired so the next `ensure_fresh` refreshes
    pub async fn force_expire(&self) {
        self.credential.write().await.expires_at = DateTime::<Utc>::UNIX_EPOCH;
    }

    /// Expire the credential only if `token` is still the current access token.
    ///
    /// Workers that were rejected with a token another worker already
    /// replaced must not trigger a second refresh.
    pub async fn expire_if_current(&self, token: &str) {
        let mut credential = self.credential.write().await;
        if credential.access_token == token {
            credential.expires_at = DateTime::<Utc>::UNIX_EPOCH;
        }
    }

    /// Number of refresh exchanges performed so far
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Current expiry of the held token
    pub async fn expires_at(&self) -> DateTime<Utc> {
        self.credential.read().await.expires_at
    }

    async fn exchange(&self, refresh_token: &str) -> Result<Credential> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        info!("Refreshing provider access token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.app_key.as_str()),
                ("client_secret", self.app_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DropsearchError::Credential(format!("Token refresh request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token refresh rejected by provider");
            return Err(DropsearchError::Credential(format!(
                "Failed to refresh token ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            DropsearchError::Credential(format!("Malformed token response: {}", e))
        })?;

        let rotated = token.refresh_token.is_some();
        let refresh_token = token
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string());

        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                DropsearchError::Credential(format!(
                    "Token response expires_in out of range: {}",
                    token.expires_in
                ))
            })?;

        debug!(expires_in = token.expires_in, rotated, "Access token refreshed");

        Ok(Credential {
            access_token: token.access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// Run a provider call with the single-retry-after-refresh policy.
///
/// The call receives a fresh access token. If it fails with
/// `AuthRejected`, the credential is expired, refreshed and the call is
/// repeated once; a second rejection becomes a `Credential` error.
pub async fn with_auth_retry<T, F, Fut>(
    credentials: &CredentialManager,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let token = credentials.ensure_fresh().await?;
    match call(token.clone()).await {
        Err(DropsearchError::AuthRejected(reason)) => {
            info!(operation, %reason, "Access token rejected, refreshing and retrying");
            credentials.expire_if_current(&token).await;
            let token = credentials.ensure_fresh().await?;
            match call(token).await {
                Err(DropsearchError::AuthRejected(reason)) => {
                    warn!(operation, %reason, "Access token rejected again after refresh");
                    Err(DropsearchError::Credential(format!(
                        "{} rejected after token refresh: {}",
                        operation, reason
                    )))
                }
                other => other,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_refresh_inside_buffer() {
        let now = Utc::now();
        let buffer = Duration::seconds(300);
        let expiring = Credential::new("a", "r", now + Duration::seconds(299));
        let fresh = Credential::new("a", "r", now + Duration::seconds(301));
        assert!(expiring.needs_refresh(now, buffer));
        assert!(!fresh.needs_refresh(now, buffer));
    }

    #[test]
    fn test_needs_refresh_when_buffer_overflows() {
        let credential = Credential::new("a", "r", DateTime::<Utc>::MAX_UTC);
        assert!(!credential.needs_refresh(Utc::now(), Duration::seconds(300)));
        assert!(credential.needs_refresh(DateTime::<Utc>::MAX_UTC, Duration::seconds(300)));
    }

    #[test]
    fn test_refresh_only_credential_needs_refresh() {
        let credential = Credential::refresh_only("r");
        assert!(credential.needs_refresh(Utc::now(), Duration::zero()));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let credential = Credential::new("very-secret", "also-secret", Utc::now());
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("secret"));
    }
}
