//! fedtree configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::topology::TierSpec;

/// Main fedtree configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Shape of the executor tree
    pub topology: TopologyConfig,
}

/// Executor tree shape, either uniform or spelled out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyConfig {
    /// Children per composing tier, then clients per leaf
    Fanout(Vec<usize>),
    /// Explicit tree of `leaf` / `composing` tiers
    Tree(TierSpec),
}

impl Default for TopologyConfig {
    fn default() -> Self {
        debug!("TopologyConfig::default: called");
        TopologyConfig::Fanout(vec![2, 3, 2])
    }
}

impl TopologyConfig {
    /// Validated tree shape
    pub fn tier_spec(&self) -> Result<TierSpec> {
        let spec = match self {
            TopologyConfig::Fanout(fanout) => {
                if fanout.iter().rev().skip(1).any(|children| *children == 0) {
                    return Err(eyre!("fanout {:?} has a composing tier without children", fanout));
                }
                TierSpec::uniform(fanout).ok_or_else(|| eyre!("fanout must not be empty"))?
            }
            TopologyConfig::Tree(spec) => spec.clone(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        self.topology.tier_spec().context("Invalid topology")?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .fedtree.yml
        let local_config = PathBuf::from(".fedtree.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/fedtree/fedtree.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fedtree").join("fedtree.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Log level from the config file, read before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = crate::yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
