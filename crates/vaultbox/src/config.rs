//! Configuration loading for vaultbox
//!
//! Read once at startup from `<config_dir>/vaultbox/config.toml`, then
//! passed by value to everything that needs it.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audit::Author;

/// Which encryption backend wraps secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Age,
    Gpg,
}

/// Vaultbox configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Store root; a leading `~` is expanded
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Recipient key id secrets are encrypted to
    #[serde(default)]
    pub key: Option<String>,

    /// Encryption backend
    #[serde(default)]
    pub codec: CodecKind,

    /// age identity file used for decryption
    #[serde(default = "default_identity")]
    pub identity: PathBuf,

    /// GnuPG home directory (defaults to gpg's own)
    #[serde(default)]
    pub gpg_homedir: Option<PathBuf>,

    /// Commit author name override
    #[serde(default)]
    pub author_name: Option<String>,

    /// Commit author email override
    #[serde(default)]
    pub author_email: Option<String>,
}

fn default_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("vaultbox")
}

fn default_identity() -> PathBuf {
    Config::config_dir().join("identity.key")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            key: None,
            codec: CodecKind::default(),
            identity: default_identity(),
            gpg_homedir: None,
            author_name: None,
            author_email: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, or use defaults if it doesn't exist
    ///
    /// `VAULTBOX_DIR` and `VAULTBOX_KEY` override the file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;

            Self::parse(&content).with_context(|| format!("Failed to parse config from {:?}", path))?
        } else {
            Config::default()
        };

        if let Ok(dir) = std::env::var("VAULTBOX_DIR") {
            config.dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var("VAULTBOX_KEY") {
            config.key = Some(key);
        }

        config.dir = expand_tilde(&config.dir);
        config.identity = expand_tilde(&config.identity);
        config.gpg_homedir = config.gpg_homedir.as_deref().map(expand_tilde);

        Ok(config)
    }

    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Directory holding vaultbox configuration
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vaultbox")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// The recipient key id, required for writes
    pub fn require_key(&self) -> Result<&str> {
        match self.key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!(
                "No encryption key configured - set `key` in {} or VAULTBOX_KEY",
                Self::config_path().display()
            ),
        }
    }

    /// Commit author override, if both halves are configured
    pub fn author(&self) -> Option<Author> {
        match (&self.author_name, &self.author_email) {
            (Some(name), Some(email)) => Some(Author {
                name: name.clone(),
                email: email.clone(),
            }),
            _ => None,
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
