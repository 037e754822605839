//! User OAuth tokens: login, refresh, status and logout.
//!
//! Tokens live in the backend [`CredentialVault::user_tokens`] selects;
//! expiry, scopes and the login payload always live in the account's entry
//! of the config file.
//!
//! # Refresh
//!
//! [`UserTokenManager::ensure`] returns the cached access token while it is
//! valid for more than [`EXPIRY_MARGIN_SECS`]. Otherwise it exchanges the
//! refresh token; a rotated refresh token replaces the stored one, a
//! response without one keeps it. A rejected refresh token fails with
//! [`AuthError::RefreshRejected`], any other endpoint failure with
//! [`AuthError::TokenGrant`]; neither writes anything.

pub mod scopes;
pub mod selector;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EnvFallback;
use crate::error::AuthError;
use crate::model::{AppIdentity, Bucket, RefreshTokenPayload, UserAccount};
use crate::oauth::{
    AuthorizationCodeFlow, AuthorizationCodeSource, OAuthEndpoints, UserTokenGrant,
    create_oauth_client, refresh_user_token,
};
use crate::registry::AuthRegistry;
use crate::store::{CredentialKind, CredentialStore, CredentialVault, Secret};
use crate::tenant::{EXPIRY_MARGIN_SECS, resolve_app_credentials};

use scopes::{canonicalize_scopes, parse_scope_list};
use selector::{Picker, ScopeSelector};

/// What `auth user status` reports for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccountStatus {
    pub account: String,
    pub logged_in: bool,
    pub access_token_valid: bool,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub scopes: Vec<String>,
    pub granted_scope: String,
    /// Backend holding the tokens.
    pub storage: &'static str,
}

/// Inputs of a login. Scope sources are tried in field order: explicit
/// scopes, services, the picker, the previous login, every suggestion.
pub struct LoginRequest<'a> {
    pub account: String,
    pub scopes: Vec<String>,
    pub services: Vec<String>,
    pub readonly: bool,
    pub force_consent: bool,
    pub picker: Option<&'a mut dyn Picker>,
}

impl LoginRequest<'_> {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            scopes: Vec::new(),
            services: Vec::new(),
            readonly: false,
            force_consent: false,
            picker: None,
        }
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub account: String,
    pub scopes: Vec<String>,
    pub granted_scope: String,
    pub expires_at: DateTime<Utc>,
    pub has_refresh_token: bool,
}

/// Scopes chosen for a login and what to remember about the choice.
struct ScopePlan {
    services: Vec<String>,
    scopes: Vec<String>,
    readonly: bool,
}

pub struct UserTokenManager {
    vault: CredentialVault,
    env: EnvFallback,
    registry: AuthRegistry,
}

impl UserTokenManager {
    pub fn new(vault: CredentialVault, env: EnvFallback, registry: AuthRegistry) -> Self {
        Self {
            vault,
            env,
            registry,
        }
    }

    /// App identity without requiring the secret.
    fn identity(&self) -> Option<AppIdentity> {
        self.vault.state().read(|c| {
            c.identity().or_else(|| {
                self.env
                    .app_id
                    .as_ref()
                    .map(|id| AppIdentity::new(id, c.base_url()))
            })
        })
    }

    fn expires_at(&self, account: &str) -> i64 {
        self.vault.state().read(|c| {
            c.account(account)
                .map(|a| a.user_access_token_expires_at)
                .unwrap_or_default()
        })
    }

    /// A valid user access token for `account`, refreshing it if needed.
    pub async fn ensure(&self, account: &str) -> Result<Secret, AuthError> {
        let Some(identity) = self.identity() else {
            if let Some(token) = &self.env.user_access_token {
                tracing::debug!("Using {} (no app configured)", EnvFallback::USER_ACCESS_TOKEN);
                return Ok(token.clone());
            }
            return Err(AuthError::Configuration {
                message: "app id is not configured; run `lark auth login` first".to_string(),
            });
        };

        let bucket = identity.account_bucket(account);
        let store = self.vault.user_tokens();
        let access = store.get(CredentialKind::UserAccessToken, &bucket).await?;
        let now = Utc::now().timestamp();

        if let Some(token) = &access {
            let expires_at = self.expires_at(account);
            if expires_at != 0 && expires_at > now + EXPIRY_MARGIN_SECS {
                tracing::debug!("Using cached user token for account {}", account);
                return Ok(token.clone());
            }
        }

        if let Some(refresh_token) = store.get(CredentialKind::UserRefreshToken, &bucket).await? {
            return self.refresh(account, &refresh_token).await;
        }

        if access.is_none() {
            if let Some(token) = &self.env.user_access_token {
                tracing::debug!("Using {}", EnvFallback::USER_ACCESS_TOKEN);
                return Ok(token.clone());
            }
            return Err(AuthError::TokenMissingOrExpired {
                message: format!(
                    "no user access token for account '{}'; run `lark auth user login`",
                    account
                ),
            });
        }

        Err(AuthError::TokenMissingOrExpired {
            message: format!(
                "user access token for account '{}' expired and there is no refresh token; \
                 run `lark auth user login`",
                account
            ),
        })
    }

    async fn refresh(&self, account: &str, refresh_token: &Secret) -> Result<Secret, AuthError> {
        let credentials = resolve_app_credentials(&self.vault, &self.env).await?;
        let endpoints = OAuthEndpoints::for_base_url(&credentials.identity.base_url);
        let client = create_oauth_client(&endpoints, &credentials, None)?;

        tracing::info!("Refreshing user token for account {}", account);
        let grant = refresh_user_token(&client, refresh_token).await?;

        let bucket = credentials.identity.account_bucket(account);
        self.persist_grant(&bucket, &grant, None).await?;
        Ok(grant.access_token)
    }

    /// Store the tokens and the account metadata of a grant.
    ///
    /// With the file backend everything lands in one config write. With the
    /// keychain the refresh token goes first and the config last. A failure
    /// part way leaves an expired access token next to a usable refresh
    /// token.
    async fn persist_grant(
        &self,
        bucket: &Bucket,
        grant: &UserTokenGrant,
        login: Option<&ScopePlan>,
    ) -> Result<DateTime<Utc>, AuthError> {
        let account = bucket.account().to_string();
        let expires_at = grant.expires_at(Utc::now());
        if grant.refresh_token.is_none() {
            tracing::debug!("No refresh token returned; keeping the stored one");
        }

        if self.vault.user_tokens_in_keychain() {
            let keychain = self.vault.keychain();
            if let Some(refresh_token) = &grant.refresh_token {
                keychain
                    .set(CredentialKind::UserRefreshToken, bucket, refresh_token)
                    .await?;
            }
            keychain
                .set(CredentialKind::UserAccessToken, bucket, &grant.access_token)
                .await?;
            self.vault.state().update(|c| {
                let entry = c.user_accounts.entry(account).or_default();
                record_grant(entry, grant, login, expires_at);
            })?;
        } else {
            self.vault.state().update(|c| {
                let entry = c.user_accounts.entry(account).or_default();
                entry.user_access_token = grant.access_token.expose().to_string();
                if let Some(refresh_token) = &grant.refresh_token {
                    entry.refresh_token = refresh_token.expose().to_string();
                }
                record_grant(entry, grant, login, expires_at);
            })?;
        }

        Ok(expires_at)
    }

    fn plan_scopes(&self, request: &mut LoginRequest<'_>) -> Result<ScopePlan, AuthError> {
        let history = self.vault.state().read(|c| {
            c.account(&request.account)
                .and_then(|a| a.user_refresh_token_payload.clone())
        });

        let (services, requested, readonly) = if !request.scopes.is_empty() {
            (Vec::new(), request.scopes.clone(), request.readonly)
        } else if !request.services.is_empty() {
            let scopes = self
                .registry
                .suggested_user_oauth_scopes_from_services(&request.services, request.readonly)?;
            (request.services.clone(), scopes, request.readonly)
        } else if let Some(picker) = request.picker.as_deref_mut() {
            let selection = ScopeSelector::new(self.registry, history, request.readonly)
                .run(picker)?
                .ok_or(AuthError::SelectionCanceled)?;
            (selection.services, selection.scopes, selection.readonly)
        } else if let Some(history) = history.filter(|h| !h.services.is_empty() || !h.scopes.is_empty()) {
            let readonly = request.readonly || history.readonly;
            if history.services.is_empty() {
                (Vec::new(), history.scopes, readonly)
            } else {
                let scopes = self
                    .registry
                    .suggested_user_oauth_scopes_from_services(&history.services, readonly)?;
                (history.services, scopes, readonly)
            }
        } else {
            let services: Vec<String> = self
                .registry
                .list_user_oauth_services()
                .into_iter()
                .map(str::to_string)
                .collect();
            let scopes = self
                .registry
                .suggested_user_oauth_scopes_from_services(&services, request.readonly)?;
            (services, scopes, request.readonly)
        };

        let offline = self.registry.offline_required_for(&services, &requested);
        Ok(ScopePlan {
            scopes: canonicalize_scopes(&requested, offline),
            services,
            readonly,
        })
    }

    /// Run the authorization-code flow and store the result.
    ///
    /// Nothing is written when selection is canceled or any step of the
    /// flow fails.
    pub async fn login(
        &self,
        mut request: LoginRequest<'_>,
        source: &dyn AuthorizationCodeSource,
    ) -> Result<LoginOutcome, AuthError> {
        let credentials = resolve_app_credentials(&self.vault, &self.env).await?;
        let plan = self.plan_scopes(&mut request)?;

        let endpoints = OAuthEndpoints::for_base_url(&credentials.identity.base_url);
        let flow = AuthorizationCodeFlow::new(&endpoints, &credentials, &source.redirect_uri())?;
        let authorization = flow.authorize(&plan.scopes, request.force_consent);

        tracing::info!(
            "Requesting user authorization for account {} ({} scopes)",
            request.account,
            plan.scopes.len()
        );
        let code = source
            .obtain_code(&authorization.url, &authorization.state)
            .await?;
        let grant = flow.exchange_code(&code, authorization).await?;

        let bucket = credentials.identity.account_bucket(&request.account);
        let store = self.vault.user_tokens();
        let had_refresh_token = store
            .get(CredentialKind::UserRefreshToken, &bucket)
            .await?
            .is_some();
        if grant.refresh_token.is_none() {
            if had_refresh_token {
                tracing::warn!("Login returned no refresh token; keeping the previous one");
            } else {
                tracing::warn!(
                    "Login returned no refresh token; the token cannot be refreshed once it expires"
                );
            }
        }

        let expires_at = self
            .persist_grant(&bucket, &grant, Some(&plan))
            .await?;

        Ok(LoginOutcome {
            account: request.account,
            granted_scope: grant.scope.clone().unwrap_or_else(|| plan.scopes.join(" ")),
            scopes: plan.scopes,
            expires_at,
            has_refresh_token: grant.refresh_token.is_some() || had_refresh_token,
        })
    }

    /// Scopes the account's token was granted, if known.
    pub fn granted_scopes(&self, account: &str) -> Option<Vec<String>> {
        self.vault.state().read(|c| {
            let record = c.account(account)?;
            if !record.user_access_token_scope.trim().is_empty() {
                Some(parse_scope_list(&record.user_access_token_scope))
            } else if !record.user_scopes.is_empty() {
                Some(record.user_scopes.clone())
            } else {
                None
            }
        })
    }

    pub async fn status(&self, account: &str) -> Result<UserAccountStatus, AuthError> {
        let store = self.vault.user_tokens();
        let record = self
            .vault
            .state()
            .read(|c| c.account(account).cloned())
            .unwrap_or_default();

        let (access, refresh) = match self.identity() {
            Some(identity) => {
                let bucket = identity.account_bucket(account);
                (
                    store.get(CredentialKind::UserAccessToken, &bucket).await?,
                    store.get(CredentialKind::UserRefreshToken, &bucket).await?,
                )
            }
            None => (None, None),
        };

        let now = Utc::now().timestamp();
        let expires_at = record.user_access_token_expires_at;
        Ok(UserAccountStatus {
            account: account.to_string(),
            logged_in: access.is_some() || refresh.is_some(),
            access_token_valid: access.is_some()
                && expires_at != 0
                && expires_at > now + EXPIRY_MARGIN_SECS,
            access_token_expires_at: record.access_token_expires_at(),
            has_refresh_token: refresh.is_some(),
            scopes: record.user_scopes,
            granted_scope: record.user_access_token_scope,
            storage: store.name(),
        })
    }

    /// Remove the account's tokens and record. Returns whether anything existed.
    pub async fn logout(&self, account: &str) -> Result<bool, AuthError> {
        let store = self.vault.user_tokens();
        if let Some(identity) = self.identity() {
            let bucket = identity.account_bucket(account);
            store.delete(CredentialKind::UserAccessToken, &bucket).await?;
            store.delete(CredentialKind::UserRefreshToken, &bucket).await?;
        }

        let existed = self
            .vault
            .state()
            .update(|c| c.user_accounts.remove(account).is_some())?;
        if existed {
            tracing::info!("Logged out account {}", account);
        }
        Ok(existed)
    }

    /// Log out every account. Returns how many were removed.
    pub async fn logout_all(&self) -> Result<usize, AuthError> {
        let accounts: Vec<String> = self
            .vault
            .state()
            .read(|c| c.user_accounts.keys().cloned().collect());

        let mut removed = 0;
        for account in accounts {
            if self.logout(&account).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn registry(&self) -> &AuthRegistry {
        &self.registry
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }
}

/// Expiry, granted scope and, for a login, what was asked for.
fn record_grant(
    entry: &mut UserAccount,
    grant: &UserTokenGrant,
    login: Option<&ScopePlan>,
    expires_at: DateTime<Utc>,
) {
    entry.user_access_token_expires_at = expires_at.timestamp();
    if let Some(scope) = &grant.scope {
        entry.user_access_token_scope = scope.clone();
    }
    if let Some(plan) = login {
        entry.user_scopes = plan.scopes.clone();
        if grant.scope.is_none() {
            entry.user_access_token_scope = plan.scopes.join(" ");
        }
        entry.user_refresh_token_payload = Some(RefreshTokenPayload {
            services: plan.services.clone(),
            scopes: if plan.services.is_empty() {
                plan.scopes.clone()
            } else {
                Vec::new()
            },
            readonly: plan.readonly,
        });
    }
}

impl std::fmt::Debug for UserTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTokenManager")
            .field("vault", &self.vault)
            .finish_non_exhaustive()
    }
}
