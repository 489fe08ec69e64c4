// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::aggregate::AggregationConfig;
use crate::normalize::NormalizerConfig;
use crate::reconcile::DivergencePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./input"),
            output_dir: PathBuf::from("./output"),
            cache_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    /// Used when `RUST_LOG` is not set.
    pub log_level: String,
    pub divergence_policy: DivergencePolicy,
    pub normalizer: NormalizerConfig,
    pub aggregation: AggregationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            log_level: "info".to_string(),
            divergence_policy: DivergencePolicy::default(),
            normalizer: NormalizerConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl Config {
    /// Read a YAML config. A missing file gives the defaults; a file that
    /// exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
