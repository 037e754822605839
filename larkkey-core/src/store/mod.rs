//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialStore`] - Trait for secret storage backends
//! - [`FileStore`] - Plaintext fields of the config file
//! - [`KeyringStore`] - OS keychain entries
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`CredentialVault`] - The app-secret invariants on top of those backends
//!
//! # Keychain Entry Convention
//!
//! Service name [`KEYCHAIN_SERVICE`], username `{bucket}:{kind}`, e.g.
//! `cli_a1:https://open.feishu.cn:app-secret`.
//!
//! # Example
//!
//! ```rust,ignore
//! use larkkey_core::store::{CredentialKind, CredentialStore, MemoryStore, Secret};
//! use larkkey_core::AppIdentity;
//!
//! let store = MemoryStore::new();
//! let bucket = AppIdentity::new("cli_a1", "https://open.feishu.cn").bucket();
//!
//! store.set(CredentialKind::AppSecret, &bucket, &Secret::new("s3cret")).await?;
//! let secret = store.get(CredentialKind::AppSecret, &bucket).await?;
//! assert_eq!(secret.unwrap().expose(), "s3cret");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{ConfigError, ConfigState};
use crate::model::{AppIdentity, Bucket, KeyringBackend};

mod file;
mod keyring;
mod memory;

pub use file::FileStore;
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

/// Keychain service name shared by every entry.
pub const KEYCHAIN_SERVICE: &str = "larkkey";

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the memory is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked form for display, keeping a short prefix.
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        if self.0.chars().count() <= 10 {
            "[REDACTED]".to_string()
        } else {
            format!("{}…[REDACTED]", prefix)
        }
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// What a stored credential is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    AppSecret,
    UserAccessToken,
    UserRefreshToken,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppSecret => "app-secret",
            Self::UserAccessToken => "user-access-token",
            Self::UserRefreshToken => "user-refresh-token",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The platform has no usable keychain. Never answered by a silent
    /// fallback to the file backend.
    #[error(
        "OS keychain is not available ({message}); choose the file backend explicitly \
         with `lark config set --keyring-backend file` or `--store-secret-in-config`"
    )]
    KeyringUnsupported { message: String },

    /// The storage backend encountered an error.
    #[error("credential backend error: {message}")]
    Backend { message: String },

    /// The config file backing the file store could not be written.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Abstraction over secret storage backends.
///
/// Implementations:
/// - [`FileStore`] - plaintext fields of the config file
/// - [`KeyringStore`] - OS keychain (with the `keyring-store` feature)
/// - [`MemoryStore`] - in-memory storage for tests
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short backend name for status output.
    fn name(&self) -> &'static str;

    /// Retrieve a secret. `Ok(None)` when nothing is stored.
    async fn get(&self, kind: CredentialKind, bucket: &Bucket)
    -> Result<Option<Secret>, StoreError>;

    /// Store a secret, overwriting any existing value.
    async fn set(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
        secret: &Secret,
    ) -> Result<(), StoreError>;

    /// Delete a secret. Succeeds when nothing was stored.
    async fn delete(&self, kind: CredentialKind, bucket: &Bucket) -> Result<(), StoreError>;
}

/// The resolved app id and secret.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub identity: AppIdentity,
    pub secret: Secret,
}

/// Both backends plus the config, with the rules that tie them together.
///
/// Owns where the app secret lives and which backend holds user tokens.
#[derive(Clone)]
pub struct CredentialVault {
    state: Arc<ConfigState>,
    file: Arc<FileStore>,
    keychain: Arc<dyn CredentialStore>,
}

impl CredentialVault {
    /// Create a vault over a config and a keychain backend.
    ///
    /// Tests pass a [`MemoryStore`] as the keychain.
    pub fn new(state: Arc<ConfigState>, keychain: Arc<dyn CredentialStore>) -> Self {
        Self {
            file: Arc::new(FileStore::new(state.clone())),
            state,
            keychain,
        }
    }

    /// Vault using the OS keychain.
    pub fn with_os_keychain(state: Arc<ConfigState>) -> Self {
        Self::new(state, Arc::new(KeyringStore::new(KEYCHAIN_SERVICE)))
    }

    pub fn state(&self) -> &Arc<ConfigState> {
        &self.state
    }

    pub fn keychain(&self) -> &Arc<dyn CredentialStore> {
        &self.keychain
    }

    /// Whether user tokens belong in the keychain, chosen purely from the config.
    pub fn user_tokens_in_keychain(&self) -> bool {
        let (backend, in_keyring) = self
            .state
            .read(|c| (c.keyring_backend, c.app_secret_in_keyring));
        match backend {
            KeyringBackend::File => false,
            KeyringBackend::Keychain => true,
            KeyringBackend::Auto => in_keyring,
        }
    }

    /// Backend that holds user tokens.
    pub fn user_tokens(&self) -> Arc<dyn CredentialStore> {
        if self.user_tokens_in_keychain() {
            self.keychain.clone()
        } else {
            self.file.clone()
        }
    }

    /// The persisted app secret, from whichever location holds it.
    pub async fn app_secret(&self, bucket: &Bucket) -> Result<Option<Secret>, StoreError> {
        let (in_keyring, plain) = self
            .state
            .read(|c| (c.app_secret_in_keyring, c.app_secret.clone()));
        if in_keyring {
            return self.keychain.get(CredentialKind::AppSecret, bucket).await;
        }
        Ok((!plain.is_empty()).then(|| Secret::new(plain)))
    }

    /// Store the app secret in exactly one place.
    ///
    /// `store_in_keyring = true` writes the keychain entry and then clears the
    /// plaintext field in the same config write that sets the flag.
    /// `false` writes the plaintext field and then deletes the keychain
    /// entry. The identity (app id and base URL) is written along with it;
    /// an entry left under a previous identity is removed.
    pub async fn persist_app_secret(
        &self,
        identity: &AppIdentity,
        secret: &Secret,
        store_in_keyring: bool,
    ) -> Result<(), StoreError> {
        let bucket = identity.bucket();
        let previous = self.state.read(|c| c.identity());

        if store_in_keyring {
            self.keychain
                .set(CredentialKind::AppSecret, &bucket, secret)
                .await?;
            self.state.update(|c| {
                apply_identity(c, identity);
                c.app_secret.clear();
                c.app_secret_in_keyring = true;
            })?;
        } else {
            self.state.update(|c| {
                apply_identity(c, identity);
                c.app_secret = secret.expose().to_string();
                c.app_secret_in_keyring = false;
            })?;
            self.keychain
                .delete(CredentialKind::AppSecret, &bucket)
                .await?;
        }

        if let Some(previous) = previous.filter(|p| p != identity) {
            self.keychain
                .delete(CredentialKind::AppSecret, &previous.bucket())
                .await?;
        }

        tracing::info!(
            "Stored app secret for {} in {}",
            identity,
            if store_in_keyring { "keychain" } else { "config file" }
        );
        Ok(())
    }

    /// Remove the app secret from both locations.
    pub async fn clear_app_secret(&self) -> Result<(), StoreError> {
        if let Some(identity) = self.state.read(|c| c.identity()) {
            self.keychain
                .delete(CredentialKind::AppSecret, &identity.bucket())
                .await?;
        }
        self.state.update(|c| {
            c.app_secret.clear();
            c.app_secret_in_keyring = false;
            c.clear_tenant_cache();
        })?;
        Ok(())
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("config", &self.state.path())
            .field("keychain", &self.keychain.name())
            .finish()
    }
}

fn apply_identity(config: &mut crate::model::PersistedConfig, identity: &AppIdentity) {
    if config.app_id != identity.app_id || config.base_url() != identity.base_url {
        // A token cached for another app must not be reused.
        config.clear_tenant_cache();
    }
    config.app_id = identity.app_id.clone();
    config.base_url = identity.base_url.clone();
}
