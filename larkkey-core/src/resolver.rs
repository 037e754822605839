//! Token resolution for a command.
//!
//! [`decide_token_type`] holds the precedence rules and is side-effect
//! free. [`TokenResolver`] applies the decision: it returns an override
//! token as is, or asks the matching manager, running the user-scope
//! preflight before any network call.

use serde::Serialize;
use std::sync::Arc;

use crate::config::ConfigState;
use crate::error::AuthError;
use crate::model::{TokenOverride, TokenPolicy, TokenType};
use crate::registry::{AuthRegistry, AuthRequirement};
use crate::store::Secret;
use crate::tenant::TenantTokenManager;
use crate::user::UserTokenManager;
use crate::user::scopes::{canonicalize_scopes, missing_scopes, relogin_command};

fn join_types(allowed: &[TokenType]) -> String {
    allowed
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pick the token type for one invocation.
///
/// 1. An override type wins, unless it contradicts an explicit request
///    (`ConflictingFlags`) or is not allowed (`UnsupportedTokenType`).
/// 2. A single allowed type is forced; an explicit different request is
///    `UnsupportedTokenType`.
/// 3. Otherwise `Auto` uses `default`, and an explicit request must be allowed.
pub fn decide_token_type(
    policy: TokenPolicy,
    allowed: &[TokenType],
    override_type: Option<TokenType>,
    default: TokenType,
) -> Result<TokenType, AuthError> {
    let explicit = policy.explicit();
    let unsupported = |requested: TokenType| AuthError::UnsupportedTokenType {
        requested,
        allowed: join_types(allowed),
    };

    if let Some(token_type) = override_type {
        if let Some(requested) = explicit.filter(|r| *r != token_type) {
            return Err(AuthError::ConflictingFlags {
                message: format!(
                    "--access-token-type {} contradicts --as {}",
                    token_type, requested
                ),
            });
        }
        if !allowed.contains(&token_type) {
            return Err(unsupported(token_type));
        }
        return Ok(token_type);
    }

    match allowed {
        [] => Err(unsupported(explicit.unwrap_or(default))),
        [only] => match explicit {
            Some(requested) if requested != *only => Err(unsupported(requested)),
            _ => Ok(*only),
        },
        _ => match explicit {
            Some(requested) if allowed.contains(&requested) => Ok(requested),
            Some(requested) => Err(unsupported(requested)),
            None if allowed.contains(&default) => Ok(default),
            None => Ok(allowed[0]),
        },
    }
}

/// One token request.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Registry path of the calling command, e.g. `drive search`.
    pub command_path: Option<String>,
    /// Types the command accepts. Empty means "ask the registry", and both
    /// types when the registry does not know the command.
    pub allowed: Vec<TokenType>,
    pub policy: TokenPolicy,
    pub token_override: Option<TokenOverride>,
    pub account: String,
}

impl ResolveRequest {
    pub fn for_command(command_path: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            command_path: Some(command_path.into()),
            allowed: Vec::new(),
            policy: TokenPolicy::Auto,
            token_override: None,
            account: account.into(),
        }
    }
}

/// A token ready to put on a request.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedToken {
    #[serde(serialize_with = "expose_secret")]
    pub token: Secret,
    pub token_type: TokenType,
}

fn expose_secret<S: serde::Serializer>(secret: &Secret, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose())
}

pub struct TokenResolver {
    registry: AuthRegistry,
    state: Arc<ConfigState>,
    tenant: TenantTokenManager,
    user: UserTokenManager,
}

impl TokenResolver {
    pub fn new(
        registry: AuthRegistry,
        state: Arc<ConfigState>,
        tenant: TenantTokenManager,
        user: UserTokenManager,
    ) -> Self {
        Self {
            registry,
            state,
            tenant,
            user,
        }
    }

    pub fn user(&self) -> &UserTokenManager {
        &self.user
    }

    pub fn tenant(&self) -> &TenantTokenManager {
        &self.tenant
    }

    /// Resolve the token a command should use.
    pub async fn resolve(&self, request: ResolveRequest) -> Result<ResolvedToken, AuthError> {
        let requirement = match &request.command_path {
            Some(path) => self.registry.requirements_for_command(path)?,
            None => None,
        };

        let allowed = if !request.allowed.is_empty() {
            request.allowed.clone()
        } else if let Some(req) = &requirement {
            req.token_types.clone()
        } else {
            vec![TokenType::Tenant, TokenType::User]
        };
        let default = self.state.read(|c| c.default_token_type);

        if let Some(token_override) = request.token_override {
            let token_type = decide_token_type(
                request.policy,
                &allowed,
                token_override.token_type,
                default,
            )?;
            tracing::debug!("Using {} token from the command line", token_type);
            return Ok(ResolvedToken {
                token: token_override.token,
                token_type,
            });
        }

        let token_type = decide_token_type(request.policy, &allowed, None, default)?;
        let token = match token_type {
            TokenType::Tenant => self.tenant.ensure().await?.token,
            TokenType::User => {
                if let Some(req) = &requirement {
                    self.preflight(req, &request.account)?;
                }
                self.user.ensure(&request.account).await?
            }
        };

        Ok(ResolvedToken { token, token_type })
    }

    /// Fail when the account's granted scopes lack what the command needs.
    ///
    /// Skipped when the granted scopes are unknown.
    pub fn preflight(&self, requirement: &AuthRequirement, account: &str) -> Result<(), AuthError> {
        let Some(granted) = self.user.granted_scopes(account) else {
            return Ok(());
        };

        let missing = missing_scopes(&requirement.required_user_scopes(), &granted);
        if missing.is_empty() {
            return Ok(());
        }

        // Relogin with the granted scopes plus the missing ones.
        let wanted = canonicalize_scopes(granted.iter().chain(&missing), false);
        Err(AuthError::ScopeInsufficient {
            context: format!(
                "user token for account '{}' cannot run '{}'",
                account, requirement.command_path
            ),
            login_command: relogin_command(&wanted),
            missing,
        })
    }
}

impl std::fmt::Debug for TokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResolver")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
