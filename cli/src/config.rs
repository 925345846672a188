use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hop_core::{models::Account, EngineConfig};
use serde::Deserialize;

/// Contents of `hop.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `<data dir>/hop/hop.db`.
    pub path: Option<PathBuf>,
}

/// ~/.config/hop/hop.toml (platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hop").join("hop.toml"))
}

impl Config {
    /// Load from `path`, or from the default location when not given.
    /// A missing default file yields an empty config; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            if explicit {
                bail!("config file {} does not exist", path.display());
            }
            return Ok(Config::default());
        }

        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Config::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text)?;
        config.engine.validate()?;
        for (i, account) in config.accounts.iter().enumerate() {
            if config.accounts[..i].iter().any(|a| a.id == account.id) {
                bail!("duplicate account id {:?}", account.id);
            }
        }
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("hop").join("hop.db")))
            .unwrap_or_else(|| PathBuf::from("hop.db"))
    }
}
