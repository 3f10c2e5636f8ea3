//! Settings loading
//!
//! Settings live in the `staticFileCache` section of a JSON file. Anything not
//! given falls back to a default, and a couple of environment variables can
//! override the file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

/// Default cached file size limit in KiB
const DEFAULT_FILE_SIZE_LIMIT_KB: u64 = 256;

/// Default socket path for the IPC server
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/static-file-cache.sock";

const ENV_SIZE_LIMIT_KB: &str = "STATIC_FILE_CACHE_SIZE_LIMIT_KB";
const ENV_CONTENT_ROOT: &str = "STATIC_FILE_CACHE_CONTENT_ROOT";

/// Settings error types
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },
}

/// Caching layer settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticFileCacheSettings {
    /// Largest cached file size, in KiB
    pub file_size_limit: u64,
    /// Directory the static files are served from
    pub content_root: PathBuf,
    /// Upper bound on the cache's total weight in bytes (unbounded if unset)
    pub max_capacity: Option<u64>,
    /// Invalidate cached files when they change on disk
    pub watch: bool,
    /// Walk the content root at startup
    pub prime_on_startup: bool,
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
}

impl Default for StaticFileCacheSettings {
    fn default() -> Self {
        Self {
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT_KB,
            content_root: PathBuf::from("wwwroot"),
            max_capacity: None,
            watch: true,
            prime_on_startup: true,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

/// Top-level settings document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    static_file_cache: StaticFileCacheSettings,
}

impl StaticFileCacheSettings {
    /// Size limit converted to bytes
    pub fn file_size_limit_bytes(&self) -> u64 {
        self.file_size_limit.saturating_mul(1024)
    }

    /// Load settings from `path`, the default location, or built-in defaults
    ///
    /// An explicit path must exist. The default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No settings file found, using defaults");
                    Self::default()
                }
            },
        };

        settings.apply_env(|name| env::var(name).ok())?;
        Ok(settings)
    }

    /// Parse the `staticFileCache` section of a settings file
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let data = fs::read(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_slice(&data).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        let file: SettingsFile = serde_json::from_slice(data)?;
        Ok(file.static_file_cache)
    }

    /// `<config dir>/static-file-cache/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("static-file-cache").join("settings.json"))
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_SIZE_LIMIT_KB) {
            self.file_size_limit = value.trim().parse().map_err(|_| SettingsError::Env {
                name: ENV_SIZE_LIMIT_KB,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_CONTENT_ROOT) {
            self.content_root = PathBuf::from(value);
        }
        Ok(())
    }
}
