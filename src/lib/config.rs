use std::{
    fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::error::{MetaError, Result};

pub const DEFAULT_PORT: u16 = 8080;

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database_path() -> PathBuf {
    PathBuf::from("evapro.db")
}

/// Server configuration, persisted as TOML. The metadata datasource is an
/// explicit field here and is handed to the archive adaptor at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the SQLite metadata database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            database_path: default_database_path(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| MetaError::Config(format!("cannot read {}: {}", path.display(), err)))?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Loads the file at `path` when given, otherwise falls back to the
    /// built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}
