use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::Context;

use crate::error::{Result, SimError};

pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;
pub const DEFAULT_MAX_NEIGHBORS: usize = 20;

/// On-disk configuration. Every field is optional; missing values fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub load_factor: Option<f64>,
    pub max_neighbors: Option<usize>,
    pub log_filter: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config = toml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn table(&self) -> Result<TableConfig> {
        let cfg = TableConfig {
            load_factor: self.load_factor.unwrap_or(DEFAULT_LOAD_FACTOR),
            max_neighbors: self.max_neighbors.unwrap_or(DEFAULT_MAX_NEIGHBORS),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Construction parameters of a single table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Capacity hint used when preallocating compacted snapshots.
    pub load_factor: f64,
    /// K: neighbors retained per document.
    pub max_neighbors: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { load_factor: DEFAULT_LOAD_FACTOR, max_neighbors: DEFAULT_MAX_NEIGHBORS }
    }
}

impl TableConfig {
    pub fn with_max_neighbors(max_neighbors: usize) -> Self {
        Self { max_neighbors, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(SimError::InvalidConfig {
                detail: format!("load_factor must be within (0, 1], got {}", self.load_factor),
            });
        }
        if self.max_neighbors == 0 {
            return Err(SimError::InvalidConfig { detail: "max_neighbors must be at least 1".into() });
        }
        Ok(())
    }
}
