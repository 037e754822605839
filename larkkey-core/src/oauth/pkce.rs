//! Authorization Code flow with PKCE (Proof Key for Code Exchange).
//!
//! # Flow Overview
//!
//! 1. Generate PKCE code verifier and challenge
//! 2. Build the authorization URL with state, scopes and the S256 challenge
//! 3. The user authorizes in a browser
//! 4. An [`AuthorizationCodeSource`](super::AuthorizationCodeSource) receives the code
//! 5. Exchange the code for tokens using the verifier
//!
//! # Example
//!
//! ```rust,ignore
//! let flow = AuthorizationCodeFlow::new(&endpoints, &credentials, &redirect_uri)?;
//! let request = flow.authorize(&scopes, false);
//! let code = source.obtain_code(&request.url, &request.state).await?;
//! let grant = flow.exchange_code(&code, request).await?;
//! ```

use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, Scope};
use url::Url;

use super::{OAuthEndpoints, UserTokenGrant, create_oauth_client, describe_request_error};
use crate::error::AuthError;
use crate::store::AppCredentials;

/// A pending authorization: the URL to visit plus what the exchange needs.
pub struct AuthorizationRequest {
    pub url: Url,
    /// CSRF state the redirect must echo back.
    pub state: String,
    verifier: PkceCodeVerifier,
}

impl std::fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// PKCE authorization-code flow for one app and redirect URI.
pub struct AuthorizationCodeFlow {
    client: BasicClient,
}

impl AuthorizationCodeFlow {
    pub fn new(
        endpoints: &OAuthEndpoints,
        credentials: &AppCredentials,
        redirect_uri: &str,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            client: create_oauth_client(endpoints, credentials, Some(redirect_uri))?,
        })
    }

    /// Build the authorization URL with a fresh verifier and CSRF state.
    ///
    /// `force_consent` adds `prompt=consent` so previously granted scopes
    /// are shown again.
    pub fn authorize(&self, scopes: &[String], force_consent: bool) -> AuthorizationRequest {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(challenge)
            .add_scopes(scopes.iter().cloned().map(Scope::new));

        if force_consent {
            request = request.add_extra_param("prompt", "consent");
        }

        let (url, state) = request.url();

        AuthorizationRequest {
            url,
            state: state.secret().to_string(),
            verifier,
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        request: AuthorizationRequest,
    ) -> Result<UserTokenGrant, AuthError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(request.verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::OAuth {
                message: format!("token exchange failed: {}", describe_request_error(&e)),
            })?;

        Ok(UserTokenGrant::from_response(&response))
    }
}
