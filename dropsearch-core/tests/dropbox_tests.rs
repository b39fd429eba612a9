//! Dropbox connector against a mock API, including the auth retry policy

use chrono::{Duration, Utc};
use dropsearch_core::{
    Credential, CredentialManager, DropboxClient, DropboxEndpoints, DropsearchError, RemoteFile,
    RemoteStore,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    server: MockServer,
    credentials: Arc<CredentialManager>,
    client: DropboxClient,
    staging: TempDir,
}

/// One mock server plays the API, content and OAuth hosts
async fn harness() -> Harness {
    let server = MockServer::start().await;
    let http = reqwest::Client::new();
    let credentials = Arc::new(CredentialManager::new(
        http.clone(),
        &server.uri(),
        "key",
        "secret",
        Credential::new("old-token", "refresh", Utc::now() + Duration::hours(4)),
        Duration::seconds(300),
    ));
    let staging = TempDir::new().unwrap();
    let client = DropboxClient::new(
        http,
        DropboxEndpoints {
            api: server.uri(),
            content: server.uri(),
        },
        credentials.clone(),
        staging.path(),
    );
    Harness {
        server,
        credentials,
        client,
        staging,
    }
}

async fn mount_refresh(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "expires_in": 14400
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn unauthorized() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({
        "error_summary": "expired_access_token/",
        "error": { ".tag": "expired_access_token" }
    }))
}

#[tokio::test]
async fn test_list_keeps_files_and_follows_cursor() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder"))
        .and(header("authorization", "Bearer old-token"))
        .and(body_json(json!({ "path": "/docs", "recursive": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [
                { ".tag": "file", "name": "A.txt", "path_lower": "/docs/a.txt", "id": "id:1" },
                { ".tag": "folder", "name": "old", "path_lower": "/docs/old", "id": "id:2" }
            ],
            "cursor": "c1",
            "has_more": true
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder/continue"))
        .and(body_json(json!({ "cursor": "c1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [
                { ".tag": "file", "name": "b.pdf", "path_lower": "/docs/b.pdf", "id": "id:3" }
            ],
            "cursor": "c2",
            "has_more": false
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let files = h.client.list("/docs").await.unwrap();
    assert_eq!(
        files,
        vec![
            RemoteFile::new("A.txt", "/docs/a.txt"),
            RemoteFile::new("b.pdf", "/docs/b.pdf"),
        ]
    );
}

#[tokio::test]
async fn test_single_401_refreshes_and_retries_once() {
    let h = harness().await;
    mount_refresh(&h.server, 1).await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [],
            "cursor": "c",
            "has_more": false
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let files = h.client.list("").await.unwrap();
    assert!(files.is_empty());
    assert_eq!(h.credentials.refresh_count(), 1);
}

#[tokio::test]
async fn test_second_401_is_credential_error() {
    let h = harness().await;
    mount_refresh(&h.server, 1).await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder"))
        .respond_with(unauthorized())
        .expect(2)
        .mount(&h.server)
        .await;

    let err = h.client.list("").await.unwrap_err();
    assert!(matches!(err, DropsearchError::Credential(_)));
    assert_eq!(h.credentials.refresh_count(), 1);
}

#[tokio::test]
async fn test_other_errors_are_not_retried() {
    let h = harness().await;
    mount_refresh(&h.server, 0).await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error_summary": "path/not_found/"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h.client.list("/missing").await.unwrap_err();
    assert!(matches!(err, DropsearchError::Remote { status: 409, .. }));
}

#[tokio::test]
async fn test_download_stages_file() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/2/files/download"))
        .and(header("Dropbox-API-Arg", r#"{"path":"/docs/notes.txt"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"meeting notes".to_vec()))
        .expect(1)
        .mount(&h.server)
        .await;

    let staged = h.client.download("/docs/notes.txt").await.unwrap();
    assert_eq!(staged, h.staging.path().join("notes.txt"));
    assert_eq!(std::fs::read_to_string(&staged).unwrap(), "meeting notes");

    let names: Vec<String> = std::fs::read_dir(h.staging.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["notes.txt".to_string()]);
}

#[tokio::test]
async fn test_download_retries_after_401() {
    let h = harness().await;
    mount_refresh(&h.server, 1).await;
    Mock::given(method("POST"))
        .and(path("/2/files/download"))
        .respond_with(unauthorized())
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/download"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"body".to_vec()))
        .expect(1)
        .mount(&h.server)
        .await;

    let staged = h.client.download("/x.txt").await.unwrap();
    assert_eq!(std::fs::read(&staged).unwrap(), b"body");
}

#[tokio::test]
async fn test_second_401_on_download_is_credential_error() {
    let h = harness().await;
    mount_refresh(&h.server, 1).await;
    Mock::given(method("POST"))
        .and(path("/2/files/download"))
        .respond_with(unauthorized())
        .expect(2)
        .mount(&h.server)
        .await;

    let err = h.client.download("/x.txt").await.unwrap_err();
    assert!(matches!(err, DropsearchError::Credential(_)));
    assert!(!err.is_per_file());
    assert_eq!(h.credentials.refresh_count(), 1);
    assert_eq!(std::fs::read_dir(h.staging.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failed_download_stages_nothing() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/2/files/download"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&h.server)
        .await;

    let err = h.client.download("/x.txt").await.unwrap_err();
    assert!(matches!(err, DropsearchError::Remote { status: 500, .. }));
    assert!(err.is_per_file());
    assert_eq!(std::fs::read_dir(h.staging.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_share_link_is_normalized() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/2/sharing/create_shared_link_with_settings"))
        .and(body_json(json!({ "path": "/docs/a.pdf" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            ".tag": "file",
            "url": "https://www.dropbox.com/s/abc/a.pdf?dl=0",
            "name": "a.pdf"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let link = h.client.share_link("/docs/a.pdf").await.unwrap();
    assert_eq!(link, "https://dl.dropboxusercontent.com/s/abc/a.pdf?dl=0");
}

#[tokio::test]
async fn test_existing_share_link_is_reused() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/2/sharing/create_shared_link_with_settings"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error_summary": "shared_link_already_exists/metadata/",
            "error": {
                ".tag": "shared_link_already_exists",
                "shared_link_already_exists": {
                    ".tag": "metadata",
                    "metadata": { "url": "https://www.dropbox.com/s/old/a.pdf?dl=0" }
                }
            }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let link = h.client.share_link("/a.pdf").await.unwrap();
    assert_eq!(link, "https://dl.dropboxusercontent.com/s/old/a.pdf?dl=0");
}

#[tokio::test]
async fn test_conflict_without_metadata_lists_links() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/2/sharing/create_shared_link_with_settings"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error_summary": "shared_link_already_exists/..",
            "error": { ".tag": "shared_link_already_exists" }
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/sharing/list_shared_links"))
        .and(body_json(json!({ "path": "/a.pdf", "direct_only": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "links": [{ "url": "https://www.dropbox.com/s/listed/a.pdf?dl=0" }],
            "has_more": false
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let link = h.client.share_link("/a.pdf").await.unwrap();
    assert_eq!(link, "https://dl.dropboxusercontent.com/s/listed/a.pdf?dl=0");
}
