//! CLI configuration.
//!
//! Read from `$XDG_CONFIG_HOME/fileheap/config.toml` (or
//! `~/.config/fileheap/config.toml`) when present. Environment variables
//! override the file:
//! - `FILEHEAP_ADDRESS`
//! - `FILEHEAP_TOKEN`
//! - `FILEHEAP_CONCURRENCY`

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use fileheap_client::ClientConfig;
use fileheap_transfer::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};

const ADDRESS_ENV: &str = "FILEHEAP_ADDRESS";
const TOKEN_ENV: &str = "FILEHEAP_TOKEN";
const CONCURRENCY_ENV: &str = "FILEHEAP_CONCURRENCY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Service address, `[scheme://]host[:port]`.
    #[serde(default)]
    pub address: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,

    /// Batches in flight during `cp`.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            concurrency: default_concurrency(),
        }
    }
}

impl Config {
    /// Loads the config file, if any, and applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(address) = var(ADDRESS_ENV).filter(|v| !v.is_empty()) {
            self.address = Some(address);
        }
        if let Some(token) = var(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
        if let Some(value) = var(CONCURRENCY_ENV).filter(|v| !v.is_empty()) {
            self.concurrency = value
                .parse()
                .with_context(|| format!("{CONCURRENCY_ENV} invalid: {value}"))?;
        }
        Ok(())
    }

    /// Client settings for the configured service.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        if self.concurrency == 0 {
            bail!("concurrency must be positive");
        }
        let Some(address) = self.address.as_deref().filter(|a| !a.is_empty()) else {
            bail!("{ADDRESS_ENV} not set");
        };

        let config = ClientConfig::new(address);
        Ok(match &self.token {
            Some(token) => config.with_token(token),
            None => config,
        })
    }
}

fn config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
    };
    Some(base.join("fileheap").join("config.toml"))
}
