//! User OAuth plumbing.
//!
//! - [`pkce`] - authorization-code flow with PKCE
//! - [`callback`] - where the authorization code comes from (loopback listener or paste)
//!
//! Both grants go to the v2 token endpoint with the app credentials in the
//! request body.

pub mod callback;
pub mod pkce;

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, RequestTokenError,
    TokenResponse, TokenUrl,
};

use crate::error::AuthError;
use crate::store::{AppCredentials, Secret};

pub use callback::{AuthorizationCodeSource, LoopbackCallback, PastedRedirect};
pub use pkce::{AuthorizationCodeFlow, AuthorizationRequest};

pub const AUTHORIZE_PATH: &str = "/open-apis/authen/v1/authorize";
pub const TOKEN_PATH: &str = "/open-apis/authen/v2/oauth/token";

/// Port of the loopback redirect listener unless `--port` says otherwise.
pub const DEFAULT_CALLBACK_PORT: u16 = 8765;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_USER_TOKEN_TTL_SECS: i64 = 7200;

/// Redirect URI served by the loopback listener on `port`.
pub fn loopback_redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{}/callback", port)
}

/// Authorization and token URLs under a base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
}

impl OAuthEndpoints {
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}{}", base, AUTHORIZE_PATH),
            token_url: format!("{}{}", base, TOKEN_PATH),
        }
    }
}

/// Create an OAuth2 client for the app.
///
/// The app id is the client id and the app secret the client secret.
pub fn create_oauth_client(
    endpoints: &OAuthEndpoints,
    credentials: &AppCredentials,
    redirect_uri: Option<&str>,
) -> Result<BasicClient, AuthError> {
    let auth_url = AuthUrl::new(endpoints.authorize_url.clone()).map_err(|e| AuthError::OAuth {
        message: format!("invalid authorization URL: {}", e),
    })?;

    let token_url = TokenUrl::new(endpoints.token_url.clone()).map_err(|e| AuthError::OAuth {
        message: format!("invalid token URL: {}", e),
    })?;

    let mut client = BasicClient::new(
        ClientId::new(credentials.identity.app_id.clone()),
        Some(ClientSecret::new(credentials.secret.expose().to_string())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody);

    if let Some(redirect) = redirect_uri {
        let redirect_url = RedirectUrl::new(redirect.to_string()).map_err(|e| AuthError::OAuth {
            message: format!("invalid redirect URL: {}", e),
        })?;
        client = client.set_redirect_uri(redirect_url);
    }

    Ok(client)
}

/// Tokens returned by either grant.
#[derive(Debug, Clone)]
pub struct UserTokenGrant {
    pub access_token: Secret,
    /// `None` when the server did not rotate or issue a refresh token.
    pub refresh_token: Option<Secret>,
    pub expires_in: Option<std::time::Duration>,
    /// Granted scopes as the server reported them, space-separated.
    pub scope: Option<String>,
}

impl UserTokenGrant {
    fn from_response(response: &BasicTokenResponse) -> Self {
        Self {
            access_token: Secret::new(response.access_token().secret()),
            refresh_token: response
                .refresh_token()
                .map(|t| Secret::new(t.secret()))
                .filter(|t| !t.is_empty()),
            expires_in: response.expires_in(),
            scope: response.scopes().map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
        }
    }

    /// Absolute expiry, defaulting the lifetime when the server gave none.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = self
            .expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_USER_TOKEN_TTL_SECS));
        now + ttl
    }
}

/// Exchange a refresh token for a new access token.
///
/// Only `invalid_grant` and `unauthorized_client` mean the refresh token
/// itself is unusable and become [`AuthError::RefreshRejected`]. Everything
/// else (rate limits, server errors, a bad app secret) is reported verbatim
/// as [`AuthError::TokenGrant`].
pub async fn refresh_user_token(
    client: &BasicClient,
    refresh_token: &Secret,
) -> Result<UserTokenGrant, AuthError> {
    let response = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
        .request_async(async_http_client)
        .await
        .map_err(|e| classify_refresh_error(&e))?;

    Ok(UserTokenGrant::from_response(&response))
}

fn classify_refresh_error<RE>(error: &RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + 'static,
{
    match error {
        RequestTokenError::ServerResponse(response)
            if matches!(
                response.error(),
                BasicErrorResponseType::InvalidGrant | BasicErrorResponseType::UnauthorizedClient
            ) =>
        {
            AuthError::RefreshRejected {
                message: response.to_string(),
            }
        }
        other => AuthError::TokenGrant {
            message: describe_request_error(other),
        },
    }
}

pub(crate) fn describe_request_error<RE>(error: &RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match error {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Request(e) => format!("request failed: {}", e),
        RequestTokenError::Parse(e, body) => format!(
            "unexpected response ({}): {}",
            e,
            String::from_utf8_lossy(body)
        ),
        RequestTokenError::Other(message) => message.clone(),
    }
}
