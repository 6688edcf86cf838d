//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/rules/config.toml)
//! 3. Environment variables (RULES_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "RULES";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local state (identity file, logs)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Backend base URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Backend anonymous API key
    #[serde(default)]
    pub backend_key: Option<String>,

    /// Whether to open the realtime change channel
    #[serde(default = "default_true")]
    pub realtime: bool,

    /// Delay between a vote and the re-sorting fetch
    #[serde(default = "default_reconcile_delay_ms")]
    pub reconcile_delay_ms: u64,

    /// Coalescing window for realtime change notices
    #[serde(default = "default_change_debounce_ms")]
    pub change_debounce_ms: u64,

    /// Per-request timeout for the REST backend
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Log level for the rules crates (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log file path (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend_url: None,
            backend_key: None,
            realtime: true,
            reconcile_delay_ms: default_reconcile_delay_ms(),
            change_debounce_ms: default_change_debounce_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (RULES_DATA_DIR, RULES_BACKEND_URL, ...)
    /// 2. Config file (~/.config/rules/config.toml or RULES_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
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

        // Empty string clears the value
        if let Ok(val) = std::env::var(format!("{}_BACKEND_URL", ENV_PREFIX)) {
            self.backend_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_BACKEND_KEY", ENV_PREFIX)) {
            self.backend_key = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_REALTIME", ENV_PREFIX)) {
            self.realtime = parse_bool(&val);
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
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

    /// Set a single value by key, as used by `rules config set`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| {
            if v.is_empty() || v == "none" {
                None
            } else {
                Some(v.to_string())
            }
        };

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "backend_url" => self.backend_url = optional(value),
            "backend_key" => self.backend_key = optional(value),
            "realtime" => self.realtime = parse_bool(value),
            "reconcile_delay_ms" => {
                self.reconcile_delay_ms = value
                    .parse()
                    .with_context(|| format!("Invalid reconcile_delay_ms: {}", value))?
            }
            "change_debounce_ms" => {
                self.change_debounce_ms = value
                    .parse()
                    .with_context(|| format!("Invalid change_debounce_ms: {}", value))?
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid request_timeout_secs: {}", value))?
            }
            "log_level" => self.log_level = value.to_string(),
            "log_file" => self.log_file = optional(value).map(PathBuf::from),
            other => anyhow::bail!(
                "Unknown config key: {}. Valid keys: data_dir, backend_url, backend_key, \
                 realtime, reconcile_delay_ms, change_debounce_ms, request_timeout_secs, \
                 log_level, log_file",
                other
            ),
        }
        Ok(())
    }

    /// Whether a remote backend is configured (URL and key both set)
    pub fn is_configured(&self) -> bool {
        self.backend_url.is_some() && self.backend_key.is_some()
    }

    /// Get the config file path
    ///
    /// Can be overridden with RULES_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rules")
            .join("config.toml")
    }

    /// Get the path to the persisted identity file
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity")
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    pub fn change_debounce(&self) -> Duration {
        Duration::from_millis(self.change_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rules")
}

fn default_true() -> bool {
    true
}

fn default_reconcile_delay_ms() -> u64 {
    2000
}

fn default_change_debounce_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}
