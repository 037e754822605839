//! Wiring from the command line to the core managers.

use anyhow::{Context as _, Result};
use larkkey_core::{
    AuthRegistry, ConfigState, CredentialVault, EnvFallback, TenantTokenManager, TokenResolver,
    UserTokenManager,
};
use std::sync::Arc;

use crate::GlobalArgs;

/// Everything a command needs, built once per invocation.
pub struct Context {
    pub state: Arc<ConfigState>,
    pub vault: CredentialVault,
    pub env: EnvFallback,
    pub registry: AuthRegistry,
}

impl Context {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let path = match &global.config {
            Some(path) => path.clone(),
            None => ConfigState::default_path().context("cannot locate the config file")?,
        };
        let state = Arc::new(
            ConfigState::load(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
        );

        Ok(Self {
            vault: CredentialVault::with_os_keychain(state.clone()),
            state,
            env: EnvFallback::from_env(),
            registry: AuthRegistry::builtin(),
        })
    }

    pub fn tenant(&self) -> TenantTokenManager {
        TenantTokenManager::new(self.vault.clone(), self.env.clone())
    }

    pub fn user(&self) -> UserTokenManager {
        UserTokenManager::new(self.vault.clone(), self.env.clone(), self.registry)
    }

    pub fn resolver(&self) -> TokenResolver {
        TokenResolver::new(self.registry, self.state.clone(), self.tenant(), self.user())
    }
}
