//! lark CLI
//!
//! Auth and config commands of the `lark` command line.
//!
//! # Usage
//!
//! ```bash
//! # Store app credentials (secret in the OS keychain)
//! lark auth login --app-id cli_xxx --app-secret xxx --store-secret-in-keyring
//!
//! # Log a user in for the drive commands
//! lark auth user login --services drive
//!
//! # Which token and scopes a command needs
//! lark auth explain drive search
//!
//! # Resolve a token the way a command would
//! lark --as user auth token --for "drive search"
//! ```

mod auth;
mod config_cmd;
mod context;
mod picker;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use larkkey_core::config::CONFIG_PATH_ENV;
use larkkey_core::{TokenOverride, TokenPolicy, TokenType};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use crate::auth::AuthCommand;
use crate::config_cmd::ConfigCommand;

#[derive(Parser, Debug)]
#[command(name = "lark")]
#[command(about = "Lark / Feishu open platform from the command line")]
#[command(version)]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Token type to use
    #[arg(long = "as", global = true, value_enum, default_value_t = AsPolicy::Auto)]
    as_policy: AsPolicy,

    /// Use this access token for this invocation only
    #[arg(long, global = true)]
    access_token: Option<String>,

    /// Type of the token given with --access-token
    #[arg(long, global = true, value_enum, requires = "access_token")]
    access_token_type: Option<TokenTypeArg>,

    /// User account to act as
    #[arg(long, global = true, default_value = larkkey_core::DEFAULT_ACCOUNT)]
    account: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// App credentials, user login and token inspection
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Read and change the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum AsPolicy {
    Auto,
    Tenant,
    User,
}

impl From<AsPolicy> for TokenPolicy {
    fn from(value: AsPolicy) -> Self {
        match value {
            AsPolicy::Auto => TokenPolicy::Auto,
            AsPolicy::Tenant => TokenPolicy::Tenant,
            AsPolicy::User => TokenPolicy::User,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TokenTypeArg {
    Tenant,
    User,
}

impl From<TokenTypeArg> for TokenType {
    fn from(value: TokenTypeArg) -> Self {
        match value {
            TokenTypeArg::Tenant => TokenType::Tenant,
            TokenTypeArg::User => TokenType::User,
        }
    }
}

/// Flags every command sees.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub policy: TokenPolicy,
    pub token_override: Option<TokenOverride>,
    pub account: String,
}

impl Cli {
    fn global_args(&self) -> GlobalArgs {
        GlobalArgs {
            config: self.config.clone(),
            policy: self.as_policy.into(),
            token_override: self.access_token.as_ref().map(|token| {
                TokenOverride::new(token.clone(), self.access_token_type.map(Into::into))
            }),
            account: self.account.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let global = cli.global_args();
    tokio::select! {
        result = run(cli.command, global) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            tracing::debug!("Interrupted; nothing was persisted by the pending step");
            bail!("interrupted")
        }
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, global: GlobalArgs) -> Result<()> {
    let ctx = context::Context::load(&global)?;
    match command {
        Commands::Auth(cmd) => auth::run(cmd, &ctx, &global).await,
        Commands::Config(cmd) => config_cmd::run(cmd, &ctx).await,
    }
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
