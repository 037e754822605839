//! Tenant access token acquisition and caching.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::EnvFallback;
use crate::error::AuthError;
use crate::model::AppIdentity;
use crate::store::{AppCredentials, CredentialVault, Secret};

/// Tokens expiring within this many seconds are treated as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

pub const TENANT_TOKEN_PATH: &str = "/open-apis/auth/v3/tenant_access_token/internal";

/// Resolve the app id and secret.
///
/// App id from the config, else `LARK_APP_ID`. Secret from the keychain
/// when the config says it lives there, else the config field, else
/// `LARK_APP_SECRET`.
pub async fn resolve_app_credentials(
    vault: &CredentialVault,
    env: &EnvFallback,
) -> Result<AppCredentials, AuthError> {
    let (app_id, base_url) = vault
        .state()
        .read(|c| (c.app_id.clone(), c.base_url().to_string()));

    let app_id = match (app_id.is_empty(), &env.app_id) {
        (false, _) => app_id,
        (true, Some(from_env)) => from_env.clone(),
        (true, None) => {
            return Err(AuthError::Configuration {
                message: format!(
                    "app id is not configured; run `lark auth login --app-id <id> --app-secret <secret>` \
                     or set {}",
                    EnvFallback::APP_ID
                ),
            });
        }
    };
    let identity = AppIdentity::new(app_id, base_url);

    let secret = match vault.app_secret(&identity.bucket()).await? {
        Some(secret) => secret,
        None => env.app_secret.clone().ok_or_else(|| AuthError::Configuration {
            message: format!(
                "app secret is not configured for {}; run `lark auth login` or set {}",
                identity.app_id,
                EnvFallback::APP_SECRET
            ),
        })?,
    };

    Ok(AppCredentials { identity, secret })
}

/// A tenant access token and its absolute expiry (unix seconds).
#[derive(Debug, Clone)]
pub struct TenantToken {
    pub token: Secret,
    pub expires_at: i64,
}

#[derive(Serialize)]
struct TenantGrantRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TenantGrantResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    expire: i64,
}

/// Fetches and caches the tenant access token of the configured app.
pub struct TenantTokenManager {
    vault: CredentialVault,
    env: EnvFallback,
    http: reqwest::Client,
}

impl TenantTokenManager {
    pub fn new(vault: CredentialVault, env: EnvFallback) -> Self {
        Self::with_client(vault, env, reqwest::Client::new())
    }

    pub fn with_client(vault: CredentialVault, env: EnvFallback, http: reqwest::Client) -> Self {
        Self { vault, env, http }
    }

    /// The cached token if it is still good for the configured app.
    fn cached(&self, app_id: &str, now: i64) -> Option<TenantToken> {
        self.vault.state().read(|c| {
            let fresh = !c.tenant_access_token.is_empty()
                && c.tenant_access_token_expires_at != 0
                && c.tenant_access_token_expires_at > now + EXPIRY_MARGIN_SECS
                && c.app_id == app_id;
            fresh.then(|| TenantToken {
                token: Secret::new(c.tenant_access_token.clone()),
                expires_at: c.tenant_access_token_expires_at,
            })
        })
    }

    /// Return a valid tenant token, granting a new one when the cache is
    /// empty, expired, or within the safety margin.
    ///
    /// A failed grant leaves the persisted cache untouched.
    pub async fn ensure(&self) -> Result<TenantToken, AuthError> {
        let credentials = resolve_app_credentials(&self.vault, &self.env).await?;
        let now = Utc::now().timestamp();

        if let Some(token) = self.cached(&credentials.identity.app_id, now) {
            tracing::debug!("Using cached tenant token for {}", credentials.identity);
            return Ok(token);
        }

        let token = self.grant(&credentials).await?;

        let app_id = credentials.identity.app_id.clone();
        let persisted = self.vault.state().update(|c| {
            // A token for an app that only came from the environment is not cached.
            if c.app_id != app_id {
                return false;
            }
            c.tenant_access_token = token.token.expose().to_string();
            c.tenant_access_token_expires_at = token.expires_at;
            true
        })?;

        if persisted {
            tracing::info!("Cached new tenant token for {}", credentials.identity);
        } else {
            tracing::debug!("Tenant token for {} not cached", credentials.identity);
        }

        Ok(token)
    }

    async fn grant(&self, credentials: &AppCredentials) -> Result<TenantToken, AuthError> {
        let url = format!(
            "{}{}",
            credentials.identity.base_url.trim_end_matches('/'),
            TENANT_TOKEN_PATH
        );
        tracing::debug!("Requesting tenant token from {}", url);

        let response = self
            .http
            .post(&url)
            .json(&TenantGrantRequest {
                app_id: &credentials.identity.app_id,
                app_secret: credentials.secret.expose(),
            })
            .send()
            .await
            .map_err(|e| AuthError::TokenGrant {
                message: format!("tenant token request failed: {}", e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::TokenGrant {
            message: format!("failed to read tenant token response: {}", e),
        })?;
        let parsed: Option<TenantGrantResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let detail = match &parsed {
                Some(r) if r.code != 0 => format!("code {}: {}", r.code, r.msg),
                _ => body.trim().to_string(),
            };
            return Err(AuthError::TokenGrant {
                message: format!("tenant token endpoint returned HTTP {}: {}", status, detail),
            });
        }

        let parsed = parsed.ok_or_else(|| AuthError::TokenGrant {
            message: format!("unexpected tenant token response: {}", body.trim()),
        })?;
        if parsed.code != 0 {
            return Err(AuthError::TokenGrant {
                message: format!("code {}: {}", parsed.code, parsed.msg),
            });
        }
        if parsed.tenant_access_token.is_empty() || parsed.expire <= 0 {
            return Err(AuthError::TokenGrant {
                message: "tenant token response carried no token".to_string(),
            });
        }

        Ok(TenantToken {
            token: Secret::new(parsed.tenant_access_token),
            expires_at: Utc::now().timestamp() + parsed.expire,
        })
    }
}
