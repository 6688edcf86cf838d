//! Device identity
//!
//! Each device gets a random anonymous token (`user_<hex>`) on first run.
//! The token is stored in a single file under the data directory and reused
//! on every later start. It is never deduplicated across devices.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;

const TOKEN_PREFIX: &str = "user_";

/// Identity of the current user, as stored in `author` and `voter` columns
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().simple()))
    }

    /// Parse a stored token. Returns `None` for blank input.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of resolving the device identity
#[derive(Debug)]
pub struct InitResult {
    pub user_id: UserId,
    /// Whether the identity was created by this call
    pub is_new: bool,
}

/// Loads and persists the device identity
pub struct Identity {
    path: PathBuf,
}

impl Identity {
    /// Create an identity manager for a specific configuration
    pub fn with_config(config: &Config) -> Self {
        Self::at_path(config.identity_path())
    }

    /// Create an identity manager backed by a specific file
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the identity file (for display purposes)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether an identity has been stored
    pub fn is_initialized(&self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }

    /// Read the stored identity, if any
    pub fn load(&self) -> Result<Option<UserId>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read identity file: {:?}", self.path))?;
        Ok(UserId::parse(&content))
    }

    /// Return the stored identity, creating and saving one on first run
    pub fn load_or_create(&self) -> Result<InitResult> {
        if let Some(user_id) = self.load()? {
            return Ok(InitResult {
                user_id,
                is_new: false,
            });
        }

        let user_id = UserId::generate();
        self.save(&user_id)?;
        info!("Created new identity {}", user_id);

        Ok(InitResult {
            user_id,
            is_new: true,
        })
    }

    fn save(&self, user_id: &UserId) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {:?}", parent))?;
        }
        std::fs::write(&self.path, user_id.as_str())
            .with_context(|| format!("Failed to write identity file: {:?}", self.path))
    }
}
