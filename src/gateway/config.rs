use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

fn default_probe_interval() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub origins: OriginsConfig,
    pub provider: ProviderConfig,
    /// Seconds between connectivity probes of the API origin.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OriginsConfig {
    /// Tile-serving origin (cache-first).
    pub tiles: String,
    /// API origin (network-first GETs, write endpoints).
    pub api: String,
    /// Style/asset origin (stale-while-revalidate).
    pub assets: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Remote suggestion endpoint (GeoJSON feature collection).
    pub endpoint: String,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}
