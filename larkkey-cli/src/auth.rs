//! `lark auth ...` commands.

use anyhow::{Context as _, Result, bail};
use clap::{Args, Subcommand};
use larkkey_core::config::{normalize_base_url, platform_name};
use larkkey_core::oauth::{
    AuthorizationCodeSource, DEFAULT_CALLBACK_PORT, LoopbackCallback, PastedRedirect,
};
use larkkey_core::user::scopes::parse_scope_list;
use larkkey_core::{
    AppIdentity, AuthError, LoginRequest, ResolveRequest, Secret, UserAccountStatus,
};
use serde::Serialize;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::context::Context;
use crate::picker::LinePicker;
use crate::{GlobalArgs, print_json};

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Store the app id and secret
    Login(AppLoginArgs),

    /// Print a tenant access token, granting a new one if needed
    Tenant,

    /// Show or change the open platform the app lives on
    #[command(subcommand)]
    Platform(PlatformCommand),

    /// User OAuth login, status and logout
    #[command(subcommand)]
    User(UserCommand),

    /// Show the token types and scopes a command needs
    Explain {
        /// Command path, e.g. `drive search`
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,

        /// Suggest read-only scopes
        #[arg(long)]
        readonly: bool,
    },

    /// Resolve the token a command would use
    Token {
        /// Command path, e.g. "drive search"
        #[arg(long = "for")]
        for_command: String,
    },
}

#[derive(Args, Debug)]
pub struct AppLoginArgs {
    #[arg(long)]
    pub app_id: Option<String>,

    /// Read from stdin when omitted and nothing is stored
    #[arg(long)]
    pub app_secret: Option<String>,

    /// Base URL or platform alias (feishu, lark)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Keep the secret in the OS keychain
    #[arg(long)]
    pub store_secret_in_keyring: bool,

    /// Keep the secret in the config file
    #[arg(long)]
    pub store_secret_in_config: bool,
}

#[derive(Subcommand, Debug)]
pub enum PlatformCommand {
    /// Switch to a platform alias (feishu, lark) or a base URL
    Set { platform: String },

    /// Show the platform and where credentials live
    Info,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Log a user in with OAuth
    Login(UserLoginArgs),

    /// Show the login state of an account
    Status {
        /// Every account in the config
        #[arg(long)]
        all: bool,
    },

    /// Remove an account's tokens
    Logout {
        /// Every account in the config
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args, Debug)]
pub struct UserLoginArgs {
    /// Exact scopes, space or comma separated
    #[arg(long)]
    pub scopes: Option<String>,

    /// Services whose suggested scopes to request
    #[arg(long, value_delimiter = ',')]
    pub services: Vec<String>,

    /// Request read-only scopes
    #[arg(long)]
    pub readonly: bool,

    /// Show the consent page even for granted scopes
    #[arg(long)]
    pub force_consent: bool,

    /// Port of the local callback listener
    #[arg(long, default_value_t = DEFAULT_CALLBACK_PORT)]
    pub port: u16,

    /// Paste the redirected URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

pub async fn run(command: AuthCommand, ctx: &Context, global: &GlobalArgs) -> Result<()> {
    match command {
        AuthCommand::Login(args) => app_login(ctx, args).await,
        AuthCommand::Tenant => tenant(ctx).await,
        AuthCommand::Platform(PlatformCommand::Set { platform }) => platform_set(ctx, &platform).await,
        AuthCommand::Platform(PlatformCommand::Info) => platform_info(ctx),
        AuthCommand::User(UserCommand::Login(args)) => user_login(ctx, global, args).await,
        AuthCommand::User(UserCommand::Status { all }) => user_status(ctx, global, all).await,
        AuthCommand::User(UserCommand::Logout { all }) => user_logout(ctx, global, all).await,
        AuthCommand::Explain { command, readonly } => {
            let explanation = ctx.registry.explain(&command.join(" "), readonly)?;
            print_json(&explanation)
        }
        AuthCommand::Token { for_command } => token(ctx, global, for_command).await,
    }
}

/// Where the app secret goes. Neither flag keeps the current location.
pub fn secret_in_keyring(
    keyring_flag: bool,
    config_flag: bool,
    currently_in_keyring: bool,
) -> Result<bool, AuthError> {
    match (keyring_flag, config_flag) {
        (true, true) => Err(AuthError::ConflictingFlags {
            message: "--store-secret-in-keyring and --store-secret-in-config are mutually exclusive"
                .to_string(),
        }),
        (true, false) => Ok(true),
        (false, true) => Ok(false),
        (false, false) => Ok(currently_in_keyring),
    }
}

async fn read_secret_from_stdin() -> Result<Secret> {
    eprint!("App secret: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read the app secret")?;
    let secret = line.trim();
    if secret.is_empty() {
        bail!(AuthError::Configuration {
            message: "app secret is required".to_string(),
        });
    }
    Ok(Secret::new(secret))
}

#[derive(Serialize)]
struct AppSummary<'a> {
    app_id: &'a str,
    base_url: &'a str,
    platform: Option<&'static str>,
    app_secret_storage: &'static str,
}

async fn app_login(ctx: &Context, args: AppLoginArgs) -> Result<()> {
    let current = ctx.state.snapshot();
    let in_keyring = secret_in_keyring(
        args.store_secret_in_keyring,
        args.store_secret_in_config,
        current.app_secret_in_keyring,
    )?;

    let app_id = args
        .app_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| (!current.app_id.is_empty()).then(|| current.app_id.clone()))
        .or_else(|| ctx.env.app_id.clone())
        .ok_or_else(|| AuthError::Configuration {
            message: "--app-id is required".to_string(),
        })?;
    let base_url = match &args.base_url {
        Some(value) => normalize_base_url(value)?,
        None => current.base_url().to_string(),
    };
    let identity = AppIdentity::new(app_id, base_url);

    let secret = match args.app_secret.filter(|s| !s.trim().is_empty()) {
        Some(secret) => Secret::new(secret.trim()),
        None => {
            let stored = match current.identity().filter(|i| i.app_id == identity.app_id) {
                Some(previous) => ctx.vault.app_secret(&previous.bucket()).await?,
                None => None,
            };
            match stored.or_else(|| ctx.env.app_secret.clone()) {
                Some(secret) => secret,
                None => read_secret_from_stdin().await?,
            }
        }
    };

    ctx.vault
        .persist_app_secret(&identity, &secret, in_keyring)
        .await?;

    print_json(&AppSummary {
        app_id: &identity.app_id,
        base_url: &identity.base_url,
        platform: platform_name(&identity.base_url),
        app_secret_storage: if in_keyring { "keychain" } else { "config" },
    })
}

#[derive(Serialize)]
struct TenantOutput {
    tenant_access_token: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn tenant(ctx: &Context) -> Result<()> {
    let token = ctx.tenant().ensure().await?;
    print_json(&TenantOutput {
        tenant_access_token: token.token.expose().to_string(),
        expires_at: chrono::DateTime::from_timestamp(token.expires_at, 0),
    })
}

async fn platform_set(ctx: &Context, platform: &str) -> Result<()> {
    let base_url = normalize_base_url(platform)?;
    let current = ctx.state.snapshot();
    if current.base_url() == base_url {
        return platform_info(ctx);
    }

    match current.identity() {
        // The keychain entry is keyed by base URL; move it along.
        Some(previous) if current.app_secret_in_keyring => {
            let secret = ctx
                .vault
                .app_secret(&previous.bucket())
                .await?
                .ok_or_else(|| AuthError::Configuration {
                    message: format!(
                        "app secret for {} is missing from the keychain; run `lark auth login`",
                        previous.app_id
                    ),
                })?;
            let identity = AppIdentity::new(previous.app_id.clone(), base_url);
            ctx.vault.persist_app_secret(&identity, &secret, true).await?;
        }
        _ => {
            ctx.state.update(|c| {
                c.base_url = base_url;
                c.clear_tenant_cache();
            })?;
        }
    }

    if !current.user_accounts.is_empty() {
        tracing::warn!("User tokens belong to the previous platform; log in again with `lark auth user login`");
    }
    platform_info(ctx)
}

#[derive(Serialize)]
struct PlatformInfo {
    base_url: String,
    platform: Option<&'static str>,
    app_id: String,
    app_secret_location: &'static str,
    keyring_backend: String,
    user_token_storage: &'static str,
    config_path: Option<String>,
}

fn platform_info(ctx: &Context) -> Result<()> {
    let config = ctx.state.snapshot();
    let app_secret_location = if config.app_secret_in_keyring {
        "keychain"
    } else if !config.app_secret.is_empty() {
        "config"
    } else if ctx.env.app_secret.is_some() {
        "environment"
    } else {
        "none"
    };

    print_json(&PlatformInfo {
        base_url: config.base_url().to_string(),
        platform: platform_name(config.base_url()),
        app_id: if config.app_id.is_empty() {
            ctx.env.app_id.clone().unwrap_or_default()
        } else {
            config.app_id.clone()
        },
        app_secret_location,
        keyring_backend: config.keyring_backend.to_string(),
        user_token_storage: ctx.vault.user_tokens().name(),
        config_path: ctx.state.path().map(|p| p.display().to_string()),
    })
}

async fn user_login(ctx: &Context, global: &GlobalArgs, args: UserLoginArgs) -> Result<()> {
    let manager = ctx.user();

    let mut picker = LinePicker::stdio();
    let mut request = LoginRequest::new(global.account.clone());
    request.scopes = args
        .scopes
        .as_deref()
        .map(parse_scope_list)
        .unwrap_or_default();
    request.services = args
        .services
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    request.readonly = args.readonly;
    request.force_consent = args.force_consent;
    if request.scopes.is_empty() && request.services.is_empty() && std::io::stdin().is_terminal() {
        request.picker = Some(&mut picker);
    }

    let source: Box<dyn AuthorizationCodeSource> = if args.no_browser {
        Box::new(PastedRedirect::new(args.port))
    } else {
        Box::new(LoopbackCallback::new(args.port).with_launcher(Box::new(|url: &str| open::that(url))))
    };

    let outcome = manager.login(request, source.as_ref()).await?;
    print_json(&outcome)
}

async fn user_status(ctx: &Context, global: &GlobalArgs, all: bool) -> Result<()> {
    let manager = ctx.user();
    if !all {
        return print_json(&manager.status(&global.account).await?);
    }

    let accounts: Vec<String> = ctx
        .state
        .read(|c| c.user_accounts.keys().cloned().collect());
    let mut statuses: Vec<UserAccountStatus> = Vec::with_capacity(accounts.len());
    for account in &accounts {
        statuses.push(manager.status(account).await?);
    }
    print_json(&statuses)
}

#[derive(Serialize)]
struct LogoutOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<String>,
    removed: usize,
}

async fn user_logout(ctx: &Context, global: &GlobalArgs, all: bool) -> Result<()> {
    let manager = ctx.user();
    let output = if all {
        LogoutOutput {
            account: None,
            removed: manager.logout_all().await?,
        }
    } else {
        LogoutOutput {
            account: Some(global.account.clone()),
            removed: usize::from(manager.logout(&global.account).await?),
        }
    };
    print_json(&output)
}

async fn token(ctx: &Context, global: &GlobalArgs, for_command: String) -> Result<()> {
    let request = ResolveRequest {
        command_path: Some(for_command),
        allowed: Vec::new(),
        policy: global.policy,
        token_override: global.token_override.clone(),
        account: global.account.clone(),
    };
    let resolved = ctx.resolver().resolve(request).await?;
    print_json(&resolved)
}
