//! Config-file-backed credential storage.

use async_trait::async_trait;
use std::sync::Arc;

use super::{CredentialKind, CredentialStore, Secret, StoreError};
use crate::config::ConfigState;
use crate::model::{Bucket, PersistedConfig};

/// Credential store over the plaintext fields of the config file.
///
/// The app secret maps to `app_secret`; user tokens map to the fields of
/// the bucket's entry in `user_accounts`. Every `set`/`delete` is a config
/// write.
pub struct FileStore {
    state: Arc<ConfigState>,
}

impl FileStore {
    pub fn new(state: Arc<ConfigState>) -> Self {
        Self { state }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.state.path())
            .finish()
    }
}

fn field<'a>(config: &'a PersistedConfig, kind: CredentialKind, bucket: &Bucket) -> Option<&'a str> {
    match kind {
        CredentialKind::AppSecret => Some(config.app_secret.as_str()),
        CredentialKind::UserAccessToken => config
            .account(bucket.account())
            .map(|a| a.user_access_token.as_str()),
        CredentialKind::UserRefreshToken => config
            .account(bucket.account())
            .map(|a| a.refresh_token.as_str()),
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
    ) -> Result<Option<Secret>, StoreError> {
        Ok(self.state.read(|c| {
            field(c, kind, bucket)
                .filter(|v| !v.is_empty())
                .map(Secret::new)
        }))
    }

    async fn set(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
        secret: &Secret,
    ) -> Result<(), StoreError> {
        let value = secret.expose().to_string();
        self.state.update(|c| match kind {
            CredentialKind::AppSecret => c.app_secret = value,
            CredentialKind::UserAccessToken => {
                c.user_accounts
                    .entry(bucket.account().to_string())
                    .or_default()
                    .user_access_token = value;
            }
            CredentialKind::UserRefreshToken => {
                c.user_accounts
                    .entry(bucket.account().to_string())
                    .or_default()
                    .refresh_token = value;
            }
        })?;
        Ok(())
    }

    async fn delete(&self, kind: CredentialKind, bucket: &Bucket) -> Result<(), StoreError> {
        let present = self
            .state
            .read(|c| field(c, kind, bucket).is_some_and(|v| !v.is_empty()));
        if !present {
            return Ok(());
        }

        self.state.update(|c| match kind {
            CredentialKind::AppSecret => c.app_secret.clear(),
            CredentialKind::UserAccessToken => {
                if let Some(account) = c.user_accounts.get_mut(bucket.account()) {
                    account.user_access_token.clear();
                }
            }
            CredentialKind::UserRefreshToken => {
                if let Some(account) = c.user_accounts.get_mut(bucket.account()) {
                    account.refresh_token.clear();
                }
            }
        })?;
        Ok(())
    }
}
