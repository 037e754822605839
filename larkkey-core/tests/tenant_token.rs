//! Integration tests for tenant token caching.
//!
//! These tests verify that the TenantTokenManager:
//! - Serves a cached token without network calls while it is fresh
//! - Grants exactly once when the cache is stale, then serves the new token
//! - Leaves the persisted cache untouched when a grant fails

use chrono::Utc;
use larkkey_core::{
    AuthError, ConfigState, CredentialVault, EnvFallback, MemoryStore, PersistedConfig,
    TenantTokenManager,
};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

const GRANT_PATH: &str = "/open-apis/auth/v3/tenant_access_token/internal";

fn config(base_url: &str, cached: &str, expires_at: i64) -> PersistedConfig {
    PersistedConfig {
        app_id: "cli_a1".to_string(),
        app_secret: "s3cret".to_string(),
        base_url: base_url.to_string(),
        tenant_access_token: cached.to_string(),
        tenant_access_token_expires_at: expires_at,
        ..Default::default()
    }
}

fn manager(state: Arc<ConfigState>) -> TenantTokenManager {
    let vault = CredentialVault::new(state, Arc::new(MemoryStore::new()));
    TenantTokenManager::new(vault, EnvFallback::default())
}

async fn mount_grant(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(GRANT_PATH))
        .and(body_json(serde_json::json!({
            "app_id": "cli_a1",
            "app_secret": "s3cret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "msg": "ok",
            "tenant_access_token": token,
            "expire": 7200
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fresh_cached_token_makes_no_network_call() {
    let server = MockServer::start().await;
    mount_grant(&server, "t-new", 0).await;

    let expires_at = Utc::now().timestamp() + 3600;
    let state = Arc::new(ConfigState::in_memory(config(
        &server.uri(),
        "t-cached",
        expires_at,
    )));
    let manager = manager(state.clone());

    let token = manager.ensure().await.unwrap();
    assert_eq!(token.token.expose(), "t-cached");
    assert_eq!(token.expires_at, expires_at);
    assert_eq!(state.snapshot().tenant_access_token, "t-cached");
}

#[tokio::test]
async fn test_token_inside_margin_is_granted_once() {
    let server = MockServer::start().await;
    mount_grant(&server, "t-new", 1).await;

    // Expires in 30s, inside the 60s margin.
    let state = Arc::new(ConfigState::in_memory(config(
        &server.uri(),
        "t-old",
        Utc::now().timestamp() + 30,
    )));
    let manager = manager(state.clone());

    let before = Utc::now().timestamp();
    let token = manager.ensure().await.unwrap();
    assert_eq!(token.token.expose(), "t-new");

    let config = state.snapshot();
    assert_eq!(config.tenant_access_token, "t-new");
    assert!(config.tenant_access_token_expires_at >= before + 7200);

    // Immediately again: served from cache.
    let again = manager.ensure().await.unwrap();
    assert_eq!(again.token.expose(), "t-new");
}

#[tokio::test]
async fn test_zero_expiry_means_no_cached_token() {
    let server = MockServer::start().await;
    mount_grant(&server, "t-new", 1).await;

    let state = Arc::new(ConfigState::in_memory(config(&server.uri(), "t-stale", 0)));
    let token = manager(state).ensure().await.unwrap();
    assert_eq!(token.token.expose(), "t-new");
}

#[tokio::test]
async fn test_grant_error_code_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRANT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 10003,
            "msg": "invalid app_secret"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let original = config(&server.uri(), "t-old", Utc::now().timestamp() - 10);
    let state = Arc::new(ConfigState::in_memory(original.clone()));

    let err = manager(state.clone()).ensure().await.unwrap_err();
    match err {
        AuthError::TokenGrant { message } => {
            assert!(message.contains("10003"));
            assert!(message.contains("invalid app_secret"));
        }
        other => panic!("expected TokenGrant, got {other:?}"),
    }
    assert_eq!(state.snapshot(), original);
}

#[tokio::test]
async fn test_server_error_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRANT_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let original = config(&server.uri(), "", 0);
    let state = Arc::new(ConfigState::in_memory(original.clone()));

    let err = manager(state.clone()).ensure().await.unwrap_err();
    assert!(matches!(err, AuthError::TokenGrant { .. }));
    assert!(err.to_string().contains("503"));
    assert_eq!(state.snapshot(), original);
}

#[tokio::test]
async fn test_granted_token_is_written_to_disk() {
    let server = MockServer::start().await;
    mount_grant(&server, "t-disk", 1).await;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    let state = Arc::new(ConfigState::load(&config_path).unwrap());
    state
        .update(|c| *c = config(&server.uri(), "", 0))
        .unwrap();

    manager(state).ensure().await.unwrap();

    let reloaded = ConfigState::load(&config_path).unwrap().snapshot();
    assert_eq!(reloaded.tenant_access_token, "t-disk");
    assert!(reloaded.tenant_access_token_expires_at > Utc::now().timestamp());
}

#[tokio::test]
async fn test_missing_credentials_fail_before_network() {
    let server = MockServer::start().await;
    mount_grant(&server, "t-new", 0).await;

    let state = Arc::new(ConfigState::in_memory(PersistedConfig {
        base_url: server.uri(),
        ..Default::default()
    }));
    let err = manager(state).ensure().await.unwrap_err();
    assert!(matches!(err, AuthError::Configuration { .. }));
}
