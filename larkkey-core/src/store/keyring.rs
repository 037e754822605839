//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;

use super::{CredentialKind, CredentialStore, Secret, StoreError};
use crate::model::Bucket;

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API
/// - Windows: Credential Manager
///
/// # Entry Format
///
/// Service is the name given at construction; username is
/// `{bucket}:{kind}`. When the platform has no keyring, every `get`/`set`
/// fails with [`StoreError::KeyringUnsupported`] and `delete` succeeds.
///
/// Without the `keyring-store` feature the store behaves as if the
/// platform had no keyring.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Create a new keyring store with the given service name.
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    fn username(kind: CredentialKind, bucket: &Bucket) -> String {
        format!("{}:{}", bucket.key(), kind.as_str())
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[cfg(feature = "keyring-store")]
mod platform {
    use ::keyring::Entry;

    use super::StoreError;

    pub(super) fn entry(service: &str, username: &str) -> Result<Entry, StoreError> {
        Entry::new(service, username).map_err(map_error)
    }

    /// Map keyring errors, singling out "no usable keyring".
    pub(super) fn map_error(e: ::keyring::Error) -> StoreError {
        match e {
            ::keyring::Error::PlatformFailure(err) => StoreError::KeyringUnsupported {
                message: format!("platform keyring failure: {}", err),
            },
            ::keyring::Error::NoStorageAccess(err) => StoreError::KeyringUnsupported {
                message: format!("no keyring storage access: {}", err),
            },
            ::keyring::Error::Ambiguous(_) => StoreError::Backend {
                message: "ambiguous keyring entry".to_string(),
            },
            ::keyring::Error::Invalid(attr, reason) => StoreError::Backend {
                message: format!("invalid keyring {}: {}", attr, reason),
            },
            other => StoreError::Backend {
                message: format!("keyring error: {}", other),
            },
        }
    }
}

#[cfg(feature = "keyring-store")]
#[async_trait]
impl CredentialStore for KeyringStore {
    fn name(&self) -> &'static str {
        "keychain"
    }

    async fn get(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
    ) -> Result<Option<Secret>, StoreError> {
        let entry = platform::entry(&self.service_name, &Self::username(kind, bucket))?;

        match entry.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(platform::map_error(e)),
        }
    }

    async fn set(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
        secret: &Secret,
    ) -> Result<(), StoreError> {
        let entry = platform::entry(&self.service_name, &Self::username(kind, bucket))?;

        entry
            .set_password(secret.expose())
            .map_err(platform::map_error)
    }

    async fn delete(&self, kind: CredentialKind, bucket: &Bucket) -> Result<(), StoreError> {
        let entry = match platform::entry(&self.service_name, &Self::username(kind, bucket)) {
            Ok(entry) => entry,
            Err(StoreError::KeyringUnsupported { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(::keyring::Error::NoEntry) => Ok(()), // Idempotent delete
            Err(e) => match platform::map_error(e) {
                StoreError::KeyringUnsupported { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
#[async_trait]
impl CredentialStore for KeyringStore {
    fn name(&self) -> &'static str {
        "keychain"
    }

    async fn get(
        &self,
        _kind: CredentialKind,
        _bucket: &Bucket,
    ) -> Result<Option<Secret>, StoreError> {
        Err(unsupported())
    }

    async fn set(
        &self,
        _kind: CredentialKind,
        _bucket: &Bucket,
        _secret: &Secret,
    ) -> Result<(), StoreError> {
        Err(unsupported())
    }

    async fn delete(&self, _kind: CredentialKind, _bucket: &Bucket) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(not(feature = "keyring-store"))]
fn unsupported() -> StoreError {
    StoreError::KeyringUnsupported {
        message: "built without keyring support".to_string(),
    }
}
