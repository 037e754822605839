//! In-memory credential storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{CredentialKind, CredentialStore, Secret, StoreError};
use crate::model::Bucket;

/// In-memory credential store for testing.
///
/// Keys follow the keychain username convention `{bucket}:{kind}`, so tests
/// can stand it in for the OS keychain.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn key(kind: CredentialKind, bucket: &Bucket) -> String {
        format!("{}:{}", bucket.key(), kind.as_str())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
    ) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(&Self::key(kind, bucket)).cloned())
    }

    async fn set(
        &self,
        kind: CredentialKind,
        bucket: &Bucket,
        secret: &Secret,
    ) -> Result<(), StoreError> {
        self.data
            .write()
            .insert(Self::key(kind, bucket), secret.clone());
        Ok(())
    }

    async fn delete(&self, kind: CredentialKind, bucket: &Bucket) -> Result<(), StoreError> {
        self.data.write().remove(&Self::key(kind, bucket));
        Ok(())
    }
}
