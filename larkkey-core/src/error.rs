//! Top-level error types for larkkey.

use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::TokenType;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Error type for every credential and token operation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// App id or app secret cannot be resolved.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The OS keychain is not available; the user has to pick the file backend.
    #[error("{message}")]
    KeyringUnsupported { message: String },

    /// No usable token and no way to obtain one without a login.
    #[error("{message}")]
    TokenMissingOrExpired { message: String },

    /// The token in use lacks scopes the command needs.
    #[error(
        "{context}\nMissing user OAuth scopes: {}\nTo grant them, run: {login_command}",
        missing.join(" ")
    )]
    ScopeInsufficient {
        context: String,
        missing: Vec<String>,
        login_command: String,
    },

    /// Two flags (or a flag and an override) contradict each other.
    #[error("conflicting flags: {message}")]
    ConflictingFlags { message: String },

    /// The command does not accept the requested token type.
    #[error("{requested} access token is not supported here (supported: {allowed})")]
    UnsupportedTokenType { requested: TokenType, allowed: String },

    /// The refresh token was rejected; only a full login helps.
    #[error(
        "user refresh token was rejected ({message}); a full relogin is required: \
         lark auth user login"
    )]
    RefreshRejected { message: String },

    /// Token endpoint failure reported verbatim (transport, rate limit, server error).
    #[error("token request failed: {message}")]
    TokenGrant { message: String },

    /// Authorization flow failure (callback error, state mismatch, code exchange).
    #[error("OAuth flow failed: {message}")]
    OAuth { message: String },

    /// The interactive selection was canceled.
    #[error("login canceled: no scopes selected")]
    SelectionCanceled,

    /// Unknown service or malformed command path.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Error reported by the wrapped API.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Error from a credential backend.
    #[error(transparent)]
    Store(StoreError),

    /// Error reading or writing the config file.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::KeyringUnsupported { .. } => Self::KeyringUnsupported {
                message: e.to_string(),
            },
            other => Self::Store(other),
        }
    }
}

/// Error returned by the wrapped API for an authenticated call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiError {
    /// Platform error code from the response body, if any.
    pub code: Option<i64>,

    /// Human-readable message from the response body.
    pub msg: String,

    pub http_status: Option<u16>,

    /// Raw response body, when available.
    pub body: Option<String>,
}

impl ApiError {
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            msg: msg.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Message and body joined, for pattern matching.
    pub fn text(&self) -> String {
        match &self.body {
            Some(body) if !body.is_empty() => format!("{}\n{}", self.msg, body),
            _ => self.msg.clone(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.http_status) {
            (Some(code), _) => write!(f, "API error {}: {}", code, self.msg),
            (None, Some(status)) => write!(f, "HTTP {}: {}", status, self.msg),
            (None, None) => write!(f, "API error: {}", self.msg),
        }
    }
}

impl std::error::Error for ApiError {}
