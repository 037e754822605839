//! Domain model types for larkkey.
//!
//! This module defines the persisted and ephemeral records the credential
//! subsystem works with:
//! - [`TokenType`] / [`TokenPolicy`] - which kind of token a command may use
//! - [`AppIdentity`] / [`Bucket`] - application identity and the storage key derived from it
//! - [`PersistedConfig`] / [`UserAccount`] - the JSON config file contents
//! - [`TokenOverride`] - a one-shot token supplied on the command line

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::store::Secret;

/// Name of the implicit account used when none is given.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Scope required to receive a refresh token at all.
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Base URL used when the config does not name one.
pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";

/// The two kinds of access token the wrapped API accepts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// App-level token obtained with the app credentials.
    #[default]
    Tenant,
    /// OAuth token granted on behalf of a user.
    User,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::User => "user",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tenant" => Ok(Self::Tenant),
            "user" => Ok(Self::User),
            other => Err(ParseError::InvalidValue {
                field: "token type",
                value: other.to_string(),
                expected: "tenant, user",
            }),
        }
    }
}

/// What the caller asked for: a concrete token type, or "whatever applies".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    #[default]
    Auto,
    Tenant,
    User,
}

impl TokenPolicy {
    /// The explicitly requested type, if any.
    pub fn explicit(&self) -> Option<TokenType> {
        match self {
            Self::Auto => None,
            Self::Tenant => Some(TokenType::Tenant),
            Self::User => Some(TokenType::User),
        }
    }
}

impl From<TokenType> for TokenPolicy {
    fn from(value: TokenType) -> Self {
        match value {
            TokenType::Tenant => Self::Tenant,
            TokenType::User => Self::User,
        }
    }
}

impl fmt::Display for TokenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.explicit() {
            Some(t) => t.fmt(f),
            None => f.write_str("auto"),
        }
    }
}

impl FromStr for TokenPolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "tenant" => Ok(Self::Tenant),
            "user" => Ok(Self::User),
            other => Err(ParseError::InvalidValue {
                field: "token policy",
                value: other.to_string(),
                expected: "auto, tenant, user",
            }),
        }
    }
}

/// Which backend holds user tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyringBackend {
    /// Plaintext fields in the config file.
    File,
    /// OS keychain entries.
    Keychain,
    /// Keychain when the app secret lives there, file otherwise.
    #[default]
    Auto,
}

impl KeyringBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Keychain => "keychain",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for KeyringBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyringBackend {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keychain" | "keyring" => Ok(Self::Keychain),
            "auto" => Ok(Self::Auto),
            other => Err(ParseError::InvalidValue {
                field: "keyring backend",
                value: other.to_string(),
                expected: "file, keychain, auto",
            }),
        }
    }
}

/// The application a config file belongs to.
///
/// Namespaces keychain entries and user-account buckets. The bucket key is
/// the literal `app_id:base_url` tuple so keychain entries stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppIdentity {
    pub app_id: String,
    pub base_url: String,
}

impl AppIdentity {
    pub fn new(app_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            base_url: base_url.into(),
        }
    }

    /// Bucket for app-level secrets.
    pub fn bucket(&self) -> Bucket {
        Bucket {
            identity: self.clone(),
            account: None,
        }
    }

    /// Bucket for one named user account.
    pub fn account_bucket(&self, account: &str) -> Bucket {
        Bucket {
            identity: self.clone(),
            account: Some(account.to_string()),
        }
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_id, self.base_url)
    }
}

/// Storage key for a credential: an app identity plus an optional account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bucket {
    identity: AppIdentity,
    account: Option<String>,
}

impl Bucket {
    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    /// The account this bucket belongs to, `default` for app-level buckets.
    pub fn account(&self) -> &str {
        self.account.as_deref().unwrap_or(DEFAULT_ACCOUNT)
    }

    /// Key used for keychain usernames.
    ///
    /// `<app_id>:<base_url>` for app-level buckets and the default account,
    /// `<app_id>:<base_url>:<account>` for any other account.
    pub fn key(&self) -> String {
        match self.account.as_deref() {
            None | Some(DEFAULT_ACCOUNT) => self.identity.to_string(),
            Some(account) => format!("{}:{}", self.identity, account),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// What a login originally asked for, so a relogin can be rebuilt without prompting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
}

/// One user-OAuth identity under an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Empty when the keychain backend holds the token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_access_token: String,

    /// Unix seconds; 0 means unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_access_token_expires_at: i64,

    /// Empty when the keychain backend holds the token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,

    /// Canonical scope set of the last login.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_scopes: Vec<String>,

    /// Raw scope string as granted by the server.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_access_token_scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_refresh_token_payload: Option<RefreshTokenPayload>,
}

impl UserAccount {
    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        if self.user_access_token_expires_at == 0 {
            return None;
        }
        DateTime::from_timestamp(self.user_access_token_expires_at, 0)
    }
}

/// Root record of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,

    /// Empty when the secret lives in the keychain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_secret: String,

    #[serde(default)]
    pub app_secret_in_keyring: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,

    #[serde(default)]
    pub default_token_type: TokenType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_access_token: String,

    /// Unix seconds; 0 means no cached tenant token.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tenant_access_token_expires_at: i64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_accounts: BTreeMap<String, UserAccount>,

    #[serde(default)]
    pub keyring_backend: KeyringBackend,
}

impl PersistedConfig {
    /// Base URL, falling back to [`DEFAULT_BASE_URL`].
    pub fn base_url(&self) -> &str {
        if self.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &self.base_url
        }
    }

    /// Identity of the configured app, if an app id is set.
    pub fn identity(&self) -> Option<AppIdentity> {
        if self.app_id.is_empty() {
            return None;
        }
        Some(AppIdentity::new(&self.app_id, self.base_url()))
    }

    pub fn account(&self, name: &str) -> Option<&UserAccount> {
        self.user_accounts.get(name)
    }

    /// Drop the cached tenant token.
    pub fn clear_tenant_cache(&mut self) {
        self.tenant_access_token.clear();
        self.tenant_access_token_expires_at = 0;
    }

    /// Copy with every secret replaced by a marker, for display.
    pub fn redacted(&self) -> Self {
        fn mask(value: &str) -> String {
            if value.is_empty() {
                String::new()
            } else {
                "[REDACTED]".to_string()
            }
        }

        let mut copy = self.clone();
        copy.app_secret = mask(&copy.app_secret);
        copy.tenant_access_token = mask(&copy.tenant_access_token);
        for account in copy.user_accounts.values_mut() {
            account.user_access_token = mask(&account.user_access_token);
            account.refresh_token = mask(&account.refresh_token);
        }
        copy
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// A token supplied for a single invocation; never persisted.
#[derive(Debug, Clone)]
pub struct TokenOverride {
    pub token: Secret,

    /// `None` lets the normal policy pick the type.
    pub token_type: Option<TokenType>,
}

impl TokenOverride {
    pub fn new(token: impl Into<String>, token_type: Option<TokenType>) -> Self {
        Self {
            token: Secret::new(token),
            token_type,
        }
    }
}

/// Error parsing a model value from user input.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid {field} '{value}' (expected one of: {expected})")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_keys() {
        let identity = AppIdentity::new("cli_a1", "https://open.feishu.cn");
        assert_eq!(identity.bucket().key(), "cli_a1:https://open.feishu.cn");
        assert_eq!(
            identity.account_bucket(DEFAULT_ACCOUNT).key(),
            "cli_a1:https://open.feishu.cn"
        );
        assert_eq!(
            identity.account_bucket("work").key(),
            "cli_a1:https://open.feishu.cn:work"
        );
        assert_eq!(identity.bucket().account(), DEFAULT_ACCOUNT);
    }

    #[test]
    fn test_token_policy_parse() {
        assert_eq!("auto".parse::<TokenPolicy>().unwrap(), TokenPolicy::Auto);
        assert_eq!("USER".parse::<TokenPolicy>().unwrap(), TokenPolicy::User);
        assert_eq!(TokenPolicy::Tenant.explicit(), Some(TokenType::Tenant));
        assert!("bot".parse::<TokenPolicy>().is_err());
    }

    #[test]
    fn test_config_defaults_and_identity() {
        let config: PersistedConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.default_token_type, TokenType::Tenant);
        assert_eq!(config.keyring_backend, KeyringBackend::Auto);
        assert!(config.identity().is_none());
    }

    #[test]
    fn test_config_skips_empty_fields() {
        let config = PersistedConfig {
            app_id: "cli_a1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("app_secret\""));
        assert!(!json.contains("tenant_access_token\""));
        assert!(json.contains("\"app_secret_in_keyring\":false"));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = PersistedConfig {
            app_secret: "s3cret".to_string(),
            tenant_access_token: "t-123".to_string(),
            ..Default::default()
        };
        config.user_accounts.insert(
            DEFAULT_ACCOUNT.to_string(),
            UserAccount {
                refresh_token: "r-1".to_string(),
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("t-123"));
        assert!(!json.contains("r-1"));
    }
}
