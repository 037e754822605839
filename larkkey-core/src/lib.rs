//! # larkkey core
//!
//! Credential and access-token lifecycle for the `lark` CLI.
//!
//! This crate provides:
//! - The config file model and its atomic persistence
//! - Credential stores (config file, OS keychain, in-memory for tests)
//! - The auth registry mapping commands to services, token types and scopes
//! - Tenant and user token managers, with refresh and the OAuth login flow
//! - The token resolver every command calls, and the missing-scope hint enricher
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use larkkey_core::{ResolveRequest, TokenResolver};
//!
//! async fn token_for(resolver: &TokenResolver) -> Result<String, larkkey_core::AuthError> {
//!     let resolved = resolver
//!         .resolve(ResolveRequest::for_command("drive search", "default"))
//!         .await?;
//!     Ok(resolved.token.expose().to_string())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hint;
pub mod model;
pub mod oauth;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod tenant;
pub mod user;

// Re-export commonly used types at crate root
pub use model::{
    AppIdentity,
    Bucket,
    DEFAULT_ACCOUNT,
    KeyringBackend,
    PersistedConfig,
    RefreshTokenPayload,
    TokenOverride,
    TokenPolicy,
    TokenType,
    UserAccount,
};

pub use config::{
    ConfigError,
    ConfigState,
    EnvFallback,
};

pub use store::{
    AppCredentials,
    CredentialKind,
    CredentialStore,
    CredentialVault,
    FileStore,
    KeyringStore,
    MemoryStore,
    Secret,
    StoreError,
};

pub use error::{
    ApiError,
    AuthError,
};

pub use registry::{
    AuthRegistry,
    AuthRequirement,
    Explanation,
    RegistryError,
};

pub use tenant::{
    TenantToken,
    TenantTokenManager,
};

pub use user::{
    LoginOutcome,
    LoginRequest,
    UserAccountStatus,
    UserTokenManager,
};

pub use resolver::{
    ResolveRequest,
    ResolvedToken,
    TokenResolver,
    decide_token_type,
};

pub use hint::ScopeHintEnricher;
