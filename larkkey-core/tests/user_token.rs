//! Integration tests for user token refresh and login.
//!
//! These tests verify that the UserTokenManager:
//! - Refreshes an expired access token and stores a rotated refresh token
//! - Keeps the stored refresh token when the server does not rotate it
//! - Writes nothing when the refresh token is rejected
//! - Reports rate limits and server errors without asking for a relogin
//! - Never loses a rotated refresh token to a partial write
//! - Persists tokens, scopes and the login payload after a login

use async_trait::async_trait;
use chrono::Utc;
use larkkey_core::oauth::AuthorizationCodeSource;
use larkkey_core::user::selector::Picker;
use larkkey_core::{
    AppIdentity, AuthError, AuthRegistry, Bucket, ConfigState, CredentialKind, CredentialStore,
    CredentialVault, EnvFallback, KeyringBackend, LoginRequest, MemoryStore, PersistedConfig,
    Secret, StoreError, UserAccount, UserTokenManager,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

const TOKEN_PATH: &str = "/open-apis/authen/v2/oauth/token";

fn base_config(base_url: &str) -> PersistedConfig {
    PersistedConfig {
        app_id: "cli_a1".to_string(),
        app_secret: "s3cret".to_string(),
        base_url: base_url.to_string(),
        keyring_backend: KeyringBackend::File,
        ..Default::default()
    }
}

fn expired_account(base_url: &str) -> PersistedConfig {
    let mut config = base_config(base_url);
    config.user_accounts.insert(
        "default".to_string(),
        UserAccount {
            user_access_token: "u-old".to_string(),
            user_access_token_expires_at: Utc::now().timestamp() - 60,
            refresh_token: "r-old".to_string(),
            user_scopes: vec!["offline_access".to_string(), "drive:drive".to_string()],
            user_access_token_scope: "offline_access drive:drive".to_string(),
            user_refresh_token_payload: None,
        },
    );
    config
}

fn setup(config: PersistedConfig) -> (UserTokenManager, Arc<ConfigState>, Arc<MemoryStore>) {
    let state = Arc::new(ConfigState::in_memory(config));
    let keychain = Arc::new(MemoryStore::new());
    let vault = CredentialVault::new(state.clone(), keychain.clone());
    let manager = UserTokenManager::new(vault, EnvFallback::default(), AuthRegistry::builtin());
    (manager, state, keychain)
}

/// Code source that records the authorization URL and answers with a fixed code.
struct FixedCode {
    code: &'static str,
    seen: Mutex<Option<(Url, String)>>,
}

impl FixedCode {
    fn new(code: &'static str) -> Self {
        Self {
            code,
            seen: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AuthorizationCodeSource for FixedCode {
    fn redirect_uri(&self) -> String {
        "http://127.0.0.1:8765/callback".to_string()
    }

    async fn obtain_code(&self, authorize_url: &Url, state: &str) -> Result<String, AuthError> {
        *self.seen.lock() = Some((authorize_url.clone(), state.to_string()));
        Ok(self.code.to_string())
    }
}

/// Picker that cancels every prompt.
struct CancelingPicker;

impl Picker for CancelingPicker {
    fn select_one(&mut self, _prompt: &str, _options: &[String], _default: usize) -> Option<usize> {
        None
    }

    fn select_many(
        &mut self,
        _prompt: &str,
        _options: &[String],
        _preselected: &[bool],
    ) -> Option<Vec<usize>> {
        None
    }
}

#[tokio::test]
async fn test_refresh_stores_rotated_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-new",
            "refresh_token": "r-new",
            "token_type": "Bearer",
            "expires_in": 7200,
            "scope": "offline_access drive:drive docx:document"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, state, _) = setup(expired_account(&server.uri()));
    let before = Utc::now().timestamp();

    let token = manager.ensure("default").await.unwrap();
    assert_eq!(token.expose(), "u-new");

    let config = state.snapshot();
    let account = config.account("default").unwrap();
    assert_eq!(account.user_access_token, "u-new");
    assert_eq!(account.refresh_token, "r-new");
    assert!(account.user_access_token_expires_at >= before + 7200);
    assert_eq!(
        account.user_access_token_scope,
        "offline_access drive:drive docx:document"
    );
    // A refresh does not change what the login asked for.
    assert_eq!(account.user_scopes, vec!["offline_access", "drive:drive"]);

    // Fresh now: no second refresh.
    assert_eq!(manager.ensure("default").await.unwrap().expose(), "u-new");
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_old_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-new",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, state, _) = setup(expired_account(&server.uri()));
    manager.ensure("default").await.unwrap();

    let config = state.snapshot();
    let account = config.account("default").unwrap();
    assert_eq!(account.user_access_token, "u-new");
    assert_eq!(account.refresh_token, "r-old");
    assert_eq!(account.user_access_token_scope, "offline_access drive:drive");
}

#[tokio::test]
async fn test_rejected_refresh_token_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token has been revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let original = expired_account(&server.uri());
    let (manager, state, _) = setup(original.clone());

    let err = manager.ensure("default").await.unwrap_err();
    assert!(
        matches!(err, AuthError::RefreshRejected { .. }),
        "expected RefreshRejected, got {err:?}"
    );
    assert!(err.to_string().contains("invalid_grant"));
    assert_eq!(state.snapshot(), original);
}

#[tokio::test]
async fn test_transient_refresh_failure_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(1)
        .mount(&server)
        .await;

    let original = expired_account(&server.uri());
    let (manager, state, _) = setup(original.clone());

    let err = manager.ensure("default").await.unwrap_err();
    assert!(matches!(err, AuthError::TokenGrant { .. }));
    assert_eq!(state.snapshot(), original);
}

async fn refresh_failure(status: u16, body: serde_json::Value) -> (AuthError, bool) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let original = expired_account(&server.uri());
    let (manager, state, _) = setup(original.clone());
    let err = manager.ensure("default").await.unwrap_err();
    (err, state.snapshot() == original)
}

#[tokio::test]
async fn test_rate_limited_refresh_is_not_a_rejection() {
    let (err, unchanged) = refresh_failure(
        429,
        serde_json::json!({
            "error": "temporarily_unavailable",
            "error_description": "request trigger frequency limit"
        }),
    )
    .await;

    match &err {
        AuthError::TokenGrant { message } => {
            assert!(message.contains("temporarily_unavailable"));
            assert!(message.contains("request trigger frequency limit"));
        }
        other => panic!("expected TokenGrant, got {other:?}"),
    }
    assert!(!err.to_string().contains("relogin"));
    assert!(unchanged);
}

#[tokio::test]
async fn test_server_error_refresh_is_not_a_rejection() {
    let (err, unchanged) = refresh_failure(
        500,
        serde_json::json!({"error": "server_error", "error_description": "internal error"}),
    )
    .await;
    assert!(
        matches!(&err, AuthError::TokenGrant { message } if message.contains("server_error")),
        "expected TokenGrant, got {err:?}"
    );
    assert!(unchanged);

    let (err, _) = refresh_failure(401, serde_json::json!({"error": "invalid_client"})).await;
    assert!(matches!(err, AuthError::TokenGrant { .. }), "got {err:?}");
}

/// Keychain stand-in whose access-token writes fail.
struct AccessTokenWritesFail(MemoryStore);

#[async_trait]
impl CredentialStore for AccessTokenWritesFail {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, kind: CredentialKind, bucket: &Bucket) -> Result<Option<Secret>, StoreError> {
        self.0.get(kind, bucket).await
    }

    async fn set(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
        secret: &Secret,
    ) -> Result<(), StoreError> {
        if kind == CredentialKind::UserAccessToken {
            return Err(StoreError::Backend {
                message: "keychain is locked".to_string(),
            });
        }
        self.0.set(kind, bucket, secret).await
    }

    async fn delete(&self, kind: CredentialKind, bucket: &Bucket) -> Result<(), StoreError> {
        self.0.delete(kind, bucket).await
    }
}

#[tokio::test]
async fn test_partial_keychain_write_keeps_rotated_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=r-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-new",
            "refresh_token": "r-new",
            "token_type": "Bearer",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config(&server.uri());
    config.keyring_backend = KeyringBackend::Keychain;
    config.user_accounts.insert(
        "default".to_string(),
        UserAccount {
            user_access_token_expires_at: Utc::now().timestamp() - 60,
            ..Default::default()
        },
    );
    let state = Arc::new(ConfigState::in_memory(config.clone()));
    let keychain = Arc::new(AccessTokenWritesFail(MemoryStore::new()));
    let bucket = AppIdentity::new("cli_a1", server.uri()).account_bucket("default");
    keychain
        .0
        .set(CredentialKind::UserAccessToken, &bucket, &Secret::new("u-old"))
        .await
        .unwrap();
    keychain
        .0
        .set(CredentialKind::UserRefreshToken, &bucket, &Secret::new("r-old"))
        .await
        .unwrap();

    let vault = CredentialVault::new(state.clone(), keychain.clone());
    let manager = UserTokenManager::new(vault, EnvFallback::default(), AuthRegistry::builtin());

    let err = manager.ensure("default").await.unwrap_err();
    assert!(matches!(err, AuthError::Store(_)), "got {err:?}");

    // The server already invalidated r-old; r-new must survive.
    let refresh = keychain
        .get(CredentialKind::UserRefreshToken, &bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refresh.expose(), "r-new");
    // Expiry untouched, so the next call refreshes again.
    assert_eq!(state.snapshot(), config);
}

#[tokio::test]
async fn test_failed_config_write_keeps_file_tokens_consistent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-new",
            "refresh_token": "r-new",
            "token_type": "Bearer",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    let state = Arc::new(ConfigState::load(&path).unwrap());
    let original = expired_account(&server.uri());
    state.update(|c| *c = original.clone()).unwrap();
    // A directory where the file should be makes the next write fail.
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir_all(path.join("occupied")).unwrap();

    let vault = CredentialVault::new(state.clone(), Arc::new(MemoryStore::new()));
    let manager = UserTokenManager::new(vault, EnvFallback::default(), AuthRegistry::builtin());

    assert!(manager.ensure("default").await.is_err());
    let account = state.snapshot().account("default").cloned().unwrap();
    assert_eq!(account.user_access_token, "u-old");
    assert_eq!(account.refresh_token, "r-old");
    assert_eq!(state.snapshot(), original);
}

#[tokio::test]
async fn test_login_with_services_persists_account() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code-1"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-1",
            "refresh_token": "r-1",
            "token_type": "Bearer",
            "expires_in": 7200,
            "scope": "offline_access drive:drive"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, state, keychain) = setup(base_config(&server.uri()));
    let source = FixedCode::new("code-1");

    let mut request = LoginRequest::new("work");
    request.services = vec!["drive".to_string()];
    let outcome = manager.login(request, &source).await.unwrap();

    assert_eq!(outcome.account, "work");
    assert_eq!(outcome.scopes, vec!["offline_access", "drive:drive"]);
    assert_eq!(outcome.granted_scope, "offline_access drive:drive");
    assert!(outcome.has_refresh_token);

    let (url, csrf) = source.seen.lock().clone().unwrap();
    assert!(url.as_str().starts_with(&format!(
        "{}/open-apis/authen/v1/authorize",
        server.uri()
    )));
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(query.contains(&("state".to_string(), csrf)));
    assert!(query.contains(&("code_challenge_method".to_string(), "S256".to_string())));
    assert!(query.contains(&("scope".to_string(), "offline_access drive:drive".to_string())));
    assert!(!query.iter().any(|(k, _)| k == "prompt"));

    let config = state.snapshot();
    let account = config.account("work").unwrap();
    assert_eq!(account.user_access_token, "u-1");
    assert_eq!(account.refresh_token, "r-1");
    assert_eq!(account.user_scopes, vec!["offline_access", "drive:drive"]);
    let payload = account.user_refresh_token_payload.as_ref().unwrap();
    assert_eq!(payload.services, vec!["drive"]);
    assert!(payload.scopes.is_empty());
    assert!(!payload.readonly);

    // File backend: nothing went to the keychain.
    assert!(keychain.is_empty());
}

#[tokio::test]
async fn test_login_with_keychain_backend_keeps_tokens_out_of_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-1",
            "refresh_token": "r-1",
            "token_type": "Bearer",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config(&server.uri());
    config.keyring_backend = KeyringBackend::Keychain;
    let (manager, state, keychain) = setup(config);

    let mut request = LoginRequest::new("default");
    request.scopes = vec!["docx:document".to_string()];
    request.force_consent = true;
    let source = FixedCode::new("code-2");
    let outcome = manager.login(request, &source).await.unwrap();

    // docs commands refresh in the background, so offline_access is added.
    assert_eq!(outcome.scopes, vec!["offline_access", "docx:document"]);
    // No scope in the response: the requested set is recorded.
    assert_eq!(outcome.granted_scope, "offline_access docx:document");

    let (url, _) = source.seen.lock().clone().unwrap();
    assert!(url
        .query_pairs()
        .any(|(k, v)| k == "prompt" && v == "consent"));

    assert_eq!(keychain.len(), 2);
    let config = state.snapshot();
    let account = config.account("default").unwrap();
    assert!(account.user_access_token.is_empty());
    assert!(account.refresh_token.is_empty());
    assert_eq!(account.user_scopes, vec!["offline_access", "docx:document"]);
    let payload = account.user_refresh_token_payload.as_ref().unwrap();
    assert_eq!(payload.scopes, vec!["offline_access", "docx:document"]);

    let status = manager.status("default").await.unwrap();
    assert_eq!(status.storage, "memory");
    assert!(status.access_token_valid);
    assert!(status.has_refresh_token);
}

#[tokio::test]
async fn test_canceled_selection_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let original = base_config(&server.uri());
    let (manager, state, _) = setup(original.clone());

    let mut picker = CancelingPicker;
    let mut request = LoginRequest::new("default");
    request.picker = Some(&mut picker);
    let source = FixedCode::new("unused");

    let err = manager.login(request, &source).await.unwrap_err();
    assert!(matches!(err, AuthError::SelectionCanceled));
    assert!(source.seen.lock().is_none());
    assert_eq!(state.snapshot(), original);
}

#[tokio::test]
async fn test_login_without_refresh_token_keeps_previous_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "u-2",
            "token_type": "Bearer",
            "expires_in": 7200,
            "scope": "offline_access drive:drive"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, state, _) = setup(expired_account(&server.uri()));
    let mut request = LoginRequest::new("default");
    request.services = vec!["drive".to_string()];

    let outcome = manager
        .login(request, &FixedCode::new("code-3"))
        .await
        .unwrap();
    assert!(outcome.has_refresh_token);

    let config = state.snapshot();
    let account = config.account("default").unwrap();
    assert_eq!(account.user_access_token, "u-2");
    assert_eq!(account.refresh_token, "r-old");
}

#[tokio::test]
async fn test_logout_all_removes_every_account() {
    let mut config = expired_account("https://open.feishu.cn");
    config
        .user_accounts
        .insert("work".to_string(), UserAccount::default());
    let (manager, state, _) = setup(config);

    assert_eq!(manager.logout_all().await.unwrap(), 2);
    assert!(state.snapshot().user_accounts.is_empty());
    assert_eq!(manager.logout_all().await.unwrap(), 0);
}
