use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::NutritionPatternSet;

const SETTINGS_FILE: &str = "nutriscrape";
const ENV_PREFIX: &str = "NUTRI";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub debug_dump_path: PathBuf,
    pub patterns_path: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub ready_timeout_secs: u64,
    pub settle_delay_secs: u64,
    pub name_window: usize,
}

impl Settings {
    /// Defaults, then `nutriscrape.{toml,json,...}` if present, then `NUTRI_*`.
    pub fn load() -> Result<Self> {
        Self::builder()?
            .add_source(File::with_name(SETTINGS_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("failed to read settings")?
            .try_deserialize()
            .context("invalid settings")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("store_path", "nutritional_info.csv")?
            .set_default("snapshot_path", "page_snapshot.txt")?
            .set_default("debug_dump_path", "error_page.html")?
            .set_default("poll_interval_secs", 2)?
            .set_default("ready_timeout_secs", 20)?
            .set_default("settle_delay_secs", 5)?
            .set_default("name_window", 5)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn patterns(&self) -> Result<NutritionPatternSet> {
        match &self.patterns_path {
            Some(path) => NutritionPatternSet::from_file(path)
                .with_context(|| format!("loading patterns from {}", path.display())),
            None => Ok(NutritionPatternSet::builtin()?),
        }
    }
}
