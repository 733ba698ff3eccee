//! TOML-backed configuration for the assembled core.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use time::Duration;

use crate::{economy::RollConfig, supply};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    FileRead {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    TomlParse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// seconds between free rolls.
    pub roll_cooldown_secs: u64,
    /// token price of a roll when the cooldown has not elapsed.
    pub roll_cost: i64,
    /// upper bound on upstream character ids to draw from.
    pub character_universe: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            roll_cooldown_secs: 2 * 60 * 60,
            roll_cost: 3,
            character_universe: supply::DEFAULT_UNIVERSE,
        }
    }
}

impl Config {
    pub async fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::FileRead {
                    source,
                    path: path.to_path_buf(),
                })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            source,
            path: path.to_path_buf(),
        })
    }

    pub fn roll(&self) -> RollConfig {
        RollConfig {
            cooldown: Duration::seconds(self.roll_cooldown_secs as i64),
            tokens_needed: self.roll_cost,
        }
    }
}
