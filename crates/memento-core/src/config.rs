//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/memento/config.toml)
//! 3. Environment variables (MEMENTO_* prefix, plus MONGODB_URI)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;
use crate::models::DocumentId;

/// Environment variable prefix
const ENV_PREFIX: &str = "MEMENTO";

/// Name of the per-document control file
pub const CONTROL_FILE: &str = "control.json";

/// Name of the per-document key file
pub const KEY_FILE: &str = "key.json";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one sub-directory per memento
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// MongoDB connection string (optional)
    #[serde(default)]
    pub remote_uri: Option<String>,

    /// Remote database name
    #[serde(default = "default_remote_database")]
    pub remote_database: String,

    /// Remote collection holding content and key documents
    #[serde(default = "default_remote_collection")]
    pub remote_collection: String,

    /// Connect and per-operation timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Lifetime of a remote session before it is re-established
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,

    /// PBKDF2 iterations for newly created keys
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Run a migration scan whenever documents are listed
    #[serde(default)]
    pub auto_migrate: bool,

    /// Optional log file for the CLI
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_uri: None,
            remote_database: default_remote_database(),
            remote_collection: default_remote_collection(),
            connect_timeout_secs: default_connect_timeout_secs(),
            session_lifetime_secs: default_session_lifetime_secs(),
            kdf_iterations: default_kdf_iterations(),
            auto_migrate: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Configuration rooted at a specific data directory, other values default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (MEMENTO_DATA_DIR, MEMENTO_REMOTE_URI, ...)
    /// 2. Config file (~/.config/memento/config.toml or MEMENTO_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // MEMENTO_REMOTE_URI, then the conventional MONGODB_URI / mongodb_uri
        let remote_uri = std::env::var(format!("{}_REMOTE_URI", ENV_PREFIX))
            .or_else(|_| std::env::var("MONGODB_URI"))
            .or_else(|_| std::env::var("mongodb_uri"));
        if let Ok(val) = remote_uri {
            self.remote_uri = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_REMOTE_DATABASE", ENV_PREFIX)) {
            if !val.is_empty() {
                self.remote_database = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_AUTO_MIGRATE", ENV_PREFIX)) {
            self.auto_migrate = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Ensure data directory exists
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with MEMENTO_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("memento")
            .join("config.toml")
    }

    /// Directory of a single memento
    pub fn document_dir(&self, id: DocumentId) -> PathBuf {
        self.data_dir.join(id.to_string())
    }

    /// Control file of a single memento
    pub fn control_path(&self, id: DocumentId) -> PathBuf {
        self.document_dir(id).join(CONTROL_FILE)
    }

    /// Key file of a single memento
    pub fn key_path(&self, id: DocumentId) -> PathBuf {
        self.document_dir(id).join(KEY_FILE)
    }

    /// Directory holding pre-migration backups
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Whether a remote backend is configured
    pub fn remote_enabled(&self) -> bool {
        self.remote_uri.is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memento")
}

fn default_remote_database() -> String {
    "memento_storage".to_string()
}

fn default_remote_collection() -> String {
    "mementos".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_session_lifetime_secs() -> u64 {
    60 * 60
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}
