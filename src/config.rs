//! Run configuration, read from a TOML file.
//!
//! Every section is optional; anything missing falls back to the defaults below.
//!
//! ```toml
//! [dates]
//! epoch_year = 1900
//! max_year = 2100
//!
//! [statistics]
//! percentiles = [5, 25, 50, 75, 95]
//! ```
use crate::fracture_risk::FractureRiskConfig;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dates: DateConfig,
    pub statistics: StatisticsConfig,
    pub fracture_risk: FractureRiskConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let text = fs::read_to_string(path)?;
            Config::from_toml(&text)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading configuration from \"{}\"", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result {
        ensure!(
            self.dates.epoch_year <= self.dates.max_year,
            "dates.epoch_year must not be after dates.max_year"
        );
        for p in self.statistics.percentiles.iter() {
            ensure!(
                (0. ..=100.).contains(p),
                "percentile {} is outside 0-100",
                p
            );
        }
        Ok(())
    }
}

/// The range of calendar years day counts can represent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateConfig {
    /// Day 1 is the 1st of January of this year.
    pub epoch_year: i32,
    pub max_year: i32,
}

impl Default for DateConfig {
    fn default() -> Self {
        Self {
            epoch_year: 1900,
            max_year: 2100,
        }
    }
}

/// Which percentiles to report when summarising histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub percentiles: Vec<f64>,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            percentiles: vec![5., 25., 50., 75., 95.],
        }
    }
}
