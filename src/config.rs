//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration. `PALAVER_DATABASE_URL` overrides `database.url`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::services::{DEFAULT_TASK_LIST_TOOL, ManagerConfig, ToolConventions};

/// Environment variable overriding the database URL.
pub const DATABASE_URL_ENV: &str = "PALAVER_DATABASE_URL";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(String),
}

// -----------------------------------------------------------------------------
// EngineConfig (root)
// -----------------------------------------------------------------------------

/// Root configuration.
///
/// # Examples
///
/// ```
/// use palaver::config::EngineConfig;
///
/// let config = EngineConfig::from_toml_str("[manager]\nmax_live_sessions = 4\n")
///     .expect("valid config");
/// assert_eq!(config.manager.max_live_sessions, 4);
/// assert_eq!(config.tools.task_list_tools, vec!["TodoWrite".to_owned()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Connection manager limits.
    #[serde(default)]
    pub manager: ManagerSettings,
    /// Tool conventions.
    #[serde(default)]
    pub tools: ToolSettings,
    /// Database connection.
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text does not match the schema.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads configuration from a file and applies environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Applies overrides looked up by environment variable name.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.database.url = Some(url);
        }
        self
    }

    /// Returns the connection manager limits.
    #[must_use]
    pub const fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_live_sessions: self.manager.max_live_sessions,
            idle_timeout: Duration::from_secs(self.manager.idle_timeout_secs),
            replace_grace: Duration::from_millis(self.manager.replace_grace_ms),
            update_buffer: self.manager.update_buffer,
        }
    }

    /// Returns the recognised tool conventions.
    #[must_use]
    pub fn tool_conventions(&self) -> ToolConventions {
        ToolConventions::new(self.tools.task_list_tools.iter().cloned())
    }
}

// -----------------------------------------------------------------------------
// ManagerSettings
// -----------------------------------------------------------------------------

/// Connection manager limits as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Maximum number of live bindings.
    #[serde(default = "default_max_live_sessions")]
    pub max_live_sessions: usize,
    /// Idle bindings older than this are reaped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Grace period for a replaced binding's in-flight turn.
    #[serde(default = "default_replace_grace_ms")]
    pub replace_grace_ms: u64,
    /// Per-turn update buffer.
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_live_sessions: default_max_live_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            replace_grace_ms: default_replace_grace_ms(),
            update_buffer: default_update_buffer(),
        }
    }
}

const fn default_max_live_sessions() -> usize {
    100
}

const fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

const fn default_replace_grace_ms() -> u64 {
    5_000
}

const fn default_update_buffer() -> usize {
    64
}

// -----------------------------------------------------------------------------
// ToolSettings
// -----------------------------------------------------------------------------

/// Tool names with specialised payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Tools whose `todos` input is a task list.
    #[serde(default = "default_task_list_tools")]
    pub task_list_tools: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            task_list_tools: default_task_list_tools(),
        }
    }
}

fn default_task_list_tools() -> Vec<String> {
    vec![DEFAULT_TASK_LIST_TOOL.to_owned()]
}

// -----------------------------------------------------------------------------
// DatabaseSettings
// -----------------------------------------------------------------------------

/// `PostgreSQL` connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL; when absent the in-memory store is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
        }
    }
}

const fn default_pool_size() -> u32 {
    10
}
