// Application configuration: data file locations, backend selection and the
// tuning knobs of the ingestion pipeline and the partitioned store

use crate::ingest::IngestConfig;
use crate::partitioned_store::PartitionedConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Partitioned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub hotels_data_path: PathBuf,
    pub offers_data_path: PathBuf,
    pub backend: BackendKind,
    pub ingest: IngestConfig,
    pub partitioned: PartitionedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hotels_data_path: PathBuf::from("../data/hotels.csv"),
            offers_data_path: PathBuf::from("../data/offers.csv"),
            backend: BackendKind::default(),
            ingest: IngestConfig::default(),
            partitioned: PartitionedConfig::default(),
        }
    }
}

impl AppConfig {
    // Missing keys keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in {}", path.display()))
    }
}
