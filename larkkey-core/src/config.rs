//! Config file persistence.
//!
//! The config is a single JSON file loaded once per invocation. Only
//! credential/config mutating commands write it back; every other command
//! may at most refresh the cached tokens as a side effect.
//!
//! # Storage Location
//!
//! `~/.config/larkkey/config.json` on Linux, the platform equivalent
//! elsewhere, overridable with `LARKKEY_CONFIG`.
//!
//! # Concurrency
//!
//! Two processes refreshing at the same time both write the file; the last
//! writer wins. Writes are atomic (temp file + rename), so the file is never
//! left half-written.

use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::PersistedConfig;
use crate::store::Secret;

/// Environment variable naming an explicit config path.
pub const CONFIG_PATH_ENV: &str = "LARKKEY_CONFIG";

/// Known platforms and their API base URLs.
pub const PLATFORMS: &[(&str, &str)] = &[
    ("feishu", "https://open.feishu.cn"),
    ("lark", "https://open.larksuite.com"),
];

/// Error type for config file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading or writing the config file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("invalid config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,

    /// A base URL or platform name could not be understood.
    #[error("invalid base URL '{value}': {message}")]
    InvalidBaseUrl { value: String, message: String },
}

/// The loaded config plus where it came from.
///
/// [`update`](Self::update) applies a change to a copy, writes the copy,
/// and only publishes it in memory once the write succeeded. A failed write
/// leaves both memory and disk unchanged.
#[derive(Debug)]
pub struct ConfigState {
    path: Option<PathBuf>,
    config: RwLock<PersistedConfig>,
}

impl ConfigState {
    /// Default config path, honouring `LARKKEY_CONFIG`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        let dirs = directories::ProjectDirs::from("com", "larksuite", "larkkey")
            .ok_or(ConfigError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load the config from a path. A missing file yields an empty config.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            if contents.trim().is_empty() {
                PersistedConfig::default()
            } else {
                serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            PersistedConfig::default()
        };

        tracing::debug!("Loaded config from {}", path.display());

        Ok(Self {
            path: Some(path),
            config: RwLock::new(config),
        })
    }

    /// A state that is never written to disk.
    pub fn in_memory(config: PersistedConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clone of the current config.
    pub fn snapshot(&self) -> PersistedConfig {
        self.config.read().clone()
    }

    /// Read from the current config without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&PersistedConfig) -> R) -> R {
        f(&self.config.read())
    }

    /// Apply `f`, persist the result, then publish it.
    pub fn update<R>(&self, f: impl FnOnce(&mut PersistedConfig) -> R) -> Result<R, ConfigError> {
        let mut guard = self.config.write();
        let mut next = guard.clone();
        let result = f(&mut next);

        if let Some(path) = &self.path {
            write_config(path, &next)?;
            tracing::debug!("Saved config to {}", path.display());
        }

        *guard = next;
        Ok(result)
    }
}

/// Write the config atomically with owner-only permissions.
fn write_config(path: &Path, config: &PersistedConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let contents = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        file.write_all(contents.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)?;

    Ok(())
}

/// Turn a platform alias or URL into a normalized base URL.
pub fn normalize_base_url(value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if let Some((_, url)) = PLATFORMS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
    {
        return Ok((*url).to_string());
    }

    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
        value: value.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::InvalidBaseUrl {
            value: value.to_string(),
            message: "expected an absolute http(s) URL or one of: feishu, lark".to_string(),
        });
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Platform alias of a base URL, if it is a known one.
pub fn platform_name(base_url: &str) -> Option<&'static str> {
    PLATFORMS
        .iter()
        .find(|(_, url)| *url == base_url)
        .map(|(name, _)| *name)
}

/// Values read from the environment at startup.
///
/// Only consulted when the corresponding config value is empty; never
/// overrides a flag or a persisted value.
#[derive(Debug, Clone, Default)]
pub struct EnvFallback {
    pub app_id: Option<String>,
    pub app_secret: Option<Secret>,
    pub user_access_token: Option<Secret>,
}

impl EnvFallback {
    pub const APP_ID: &'static str = "LARK_APP_ID";
    pub const APP_SECRET: &'static str = "LARK_APP_SECRET";
    pub const USER_ACCESS_TOKEN: &'static str = "LARK_USER_ACCESS_TOKEN";

    /// Capture the fallbacks from the process environment.
    pub fn from_env() -> Self {
        fn non_empty(name: &str) -> Option<String> {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            app_id: non_empty(Self::APP_ID),
            app_secret: non_empty(Self::APP_SECRET).map(Secret::new),
            user_access_token: non_empty(Self::USER_ACCESS_TOKEN).map(Secret::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DEFAULT_ACCOUNT, UserAccount};
    use tempfile::TempDir;

    fn test_state() -> (ConfigState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        let state = ConfigState::load(path).unwrap();
        (state, temp_dir)
    }

    #[test]
    fn test_missing_file_loads_empty_config() {
        let (state, _temp) = test_state();
        assert_eq!(state.snapshot(), PersistedConfig::default());
        assert!(!state.path().unwrap().exists());
    }

    #[test]
    fn test_update_persists_and_reloads() {
        let (state, _temp) = test_state();
        state
            .update(|c| {
                c.app_id = "cli_a1".to_string();
                c.user_accounts
                    .insert(DEFAULT_ACCOUNT.to_string(), UserAccount::default());
            })
            .unwrap();

        let reloaded = ConfigState::load(state.path().unwrap()).unwrap();
        assert_eq!(reloaded.snapshot().app_id, "cli_a1");
        assert!(reloaded.snapshot().account(DEFAULT_ACCOUNT).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (state, _temp) = test_state();
        state.update(|c| c.app_secret = "s".to_string()).unwrap();

        let mode = fs::metadata(state.path().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = temp_dir.path().join("config.json");
        fs::create_dir_all(path.join("occupied")).unwrap();
        let blocked = ConfigState {
            path: Some(path),
            config: RwLock::new(PersistedConfig::default()),
        };

        let result = blocked.update(|c| c.app_id = "cli_new".to_string());
        assert!(result.is_err());
        assert!(blocked.snapshot().app_id.is_empty());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("lark").unwrap(),
            "https://open.larksuite.com"
        );
        assert_eq!(
            normalize_base_url("https://open.example.com/").unwrap(),
            "https://open.example.com"
        );
        assert!(normalize_base_url("ftp://example.com").is_err());
        assert!(normalize_base_url("not a url").is_err());
        assert_eq!(platform_name("https://open.feishu.cn"), Some("feishu"));
        assert_eq!(platform_name("https://open.example.com"), None);
    }
}
