//! `lark config ...` commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use larkkey_core::config::normalize_base_url;
use larkkey_core::{AppIdentity, AuthError, KeyringBackend, Secret, TokenType};

use crate::auth::secret_in_keyring;
use crate::context::Context;
use crate::print_json;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Change config values
    Set(SetArgs),

    /// Remove config values
    Unset(UnsetArgs),

    /// Print the config with secrets redacted
    Show,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = true)]
pub struct SetArgs {
    #[arg(long)]
    pub app_id: Option<String>,

    #[arg(long)]
    pub app_secret: Option<String>,

    /// Base URL or platform alias (feishu, lark)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Token type used when a command accepts both (tenant, user)
    #[arg(long)]
    pub default_token_type: Option<TokenType>,

    /// Where user tokens live (file, keychain, auto)
    #[arg(long)]
    pub keyring_backend: Option<KeyringBackend>,

    /// Move the app secret to the OS keychain
    #[arg(long)]
    pub store_secret_in_keyring: bool,

    /// Move the app secret to the config file
    #[arg(long)]
    pub store_secret_in_config: bool,
}

impl SetArgs {
    fn touches_app(&self) -> bool {
        self.app_id.is_some()
            || self.app_secret.is_some()
            || self.base_url.is_some()
            || self.store_secret_in_keyring
            || self.store_secret_in_config
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = true)]
pub struct UnsetArgs {
    /// App id, app secret and the cached tenant token
    #[arg(long)]
    pub app_id: bool,

    /// App secret from both the config file and the keychain
    #[arg(long)]
    pub app_secret: bool,

    /// Back to the default platform
    #[arg(long)]
    pub base_url: bool,

    /// Back to tenant
    #[arg(long)]
    pub default_token_type: bool,

    /// Back to auto
    #[arg(long)]
    pub keyring_backend: bool,

    /// Cached tenant access token
    #[arg(long)]
    pub tenant_token: bool,

    /// Tokens and records of every user account
    #[arg(long)]
    pub user_tokens: bool,
}

pub async fn run(command: ConfigCommand, ctx: &Context) -> Result<()> {
    match command {
        ConfigCommand::Set(args) => set(ctx, args).await?,
        ConfigCommand::Unset(args) => unset(ctx, args).await?,
        ConfigCommand::Show => {}
    }
    print_json(&ctx.state.snapshot().redacted())
}

async fn set(ctx: &Context, args: SetArgs) -> Result<()> {
    if args.touches_app() {
        set_app(ctx, &args).await?;
    }

    if let Some(token_type) = args.default_token_type {
        ctx.state.update(|c| c.default_token_type = token_type)?;
    }

    if let Some(backend) = args.keyring_backend {
        let before = ctx.vault.user_tokens().name();
        ctx.state.update(|c| c.keyring_backend = backend)?;
        let after = ctx.vault.user_tokens().name();
        if before != after && ctx.state.read(|c| !c.user_accounts.is_empty()) {
            tracing::warn!(
                "User tokens stay in the {} store; log in again to store them in the {} store",
                before,
                after
            );
        }
    }
    Ok(())
}

/// App id, base URL and secret placement change together.
async fn set_app(ctx: &Context, args: &SetArgs) -> Result<()> {
    let current = ctx.state.snapshot();
    let in_keyring = secret_in_keyring(
        args.store_secret_in_keyring,
        args.store_secret_in_config,
        current.app_secret_in_keyring,
    )?;

    let app_id = match args.app_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        Some(_) => {
            return Err(AuthError::Configuration {
                message: "--app-id must not be empty".to_string(),
            }
            .into());
        }
        None => current.app_id.clone(),
    };
    let base_url = match &args.base_url {
        Some(value) => normalize_base_url(value)?,
        None => current.base_url().to_string(),
    };

    let secret = match args.app_secret.as_deref().map(str::trim) {
        Some(secret) if !secret.is_empty() => Some(Secret::new(secret)),
        Some(_) => {
            return Err(AuthError::Configuration {
                message: "--app-secret must not be empty; use `lark config unset --app-secret`"
                    .to_string(),
            }
            .into());
        }
        None => match current.identity() {
            Some(previous) => ctx.vault.app_secret(&previous.bucket()).await?,
            None => None,
        },
    };

    match secret {
        Some(secret) => {
            if app_id.is_empty() {
                return Err(AuthError::Configuration {
                    message: "set --app-id before storing an app secret".to_string(),
                }
                .into());
            }
            let identity = AppIdentity::new(app_id, base_url);
            ctx.vault
                .persist_app_secret(&identity, &secret, in_keyring)
                .await?;
        }
        None => {
            // The keyring flag only describes a stored secret.
            if args.store_secret_in_keyring || args.store_secret_in_config {
                tracing::warn!(
                    "No app secret is stored; pass --app-secret to choose where it is kept"
                );
            }
            ctx.state.update(|c| {
                if c.app_id != app_id || c.base_url() != base_url {
                    c.clear_tenant_cache();
                }
                c.app_id = app_id;
                c.base_url = base_url;
            })?;
        }
    }
    Ok(())
}

async fn unset(ctx: &Context, args: UnsetArgs) -> Result<()> {
    if args.user_tokens {
        let removed = ctx.user().logout_all().await?;
        tracing::info!("Removed {} user account(s)", removed);
    }

    if args.app_secret || args.app_id {
        ctx.vault.clear_app_secret().await?;
    }

    ctx.state.update(|c| {
        if args.app_id {
            c.app_id.clear();
            c.clear_tenant_cache();
        }
        if args.base_url {
            c.base_url.clear();
            c.clear_tenant_cache();
        }
        if args.default_token_type {
            c.default_token_type = TokenType::default();
        }
        if args.keyring_backend {
            c.keyring_backend = KeyringBackend::default();
        }
        if args.tenant_token {
            c.clear_tenant_cache();
        }
    })?;
    Ok(())
}
