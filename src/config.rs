use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use h3o::Resolution;
use serde::Deserialize;

use crate::core::{BOUNDARY_RESOLUTION, POINT_RESOLUTION, parse_resolution};
use crate::error::FareHexError;
use crate::features::{FeatureParams, SplitParams};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub resolution: ResolutionConfig,
    pub paths: PathsConfig,
    pub trips: TripsConfig,
    pub split: SplitConfig,
    pub features: FeaturesConfig,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ResolutionConfig {
    pub boundary: u8,
    pub point: u8,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub raw: PathBuf,
    pub external: PathBuf,
    pub refined: PathBuf,
    pub features: PathBuf,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TripsConfig {
    /// `None` detects a header row from the first line of each file.
    pub has_headers: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SplitConfig {
    pub train_fraction: f64,
    pub seed: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Cos/sin harmonics of `time_in_week` in the feature table.
    pub week_fourier_order: usize,
}

/// A boundary dataset and the feature property holding its region id.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DatasetConfig {
    pub name: String,
    /// GeoJSON file relative to the external directory; defaults to
    /// `<name>.geojson`.
    pub file: Option<PathBuf>,
    pub region_field: String,
}

impl DatasetConfig {
    pub fn new(name: impl Into<String>, region_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: None,
            region_field: region_field.into(),
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            boundary: u8::from(BOUNDARY_RESOLUTION),
            point: u8::from(POINT_RESOLUTION),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            raw: PathBuf::from("raw"),
            external: PathBuf::from("external"),
            refined: PathBuf::from("refined"),
            features: PathBuf::from("features"),
        }
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        let params = SplitParams::default();
        Self {
            train_fraction: params.train_fraction,
            seed: params.seed,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            week_fourier_order: FeatureParams::default().week_fourier_order,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolution: ResolutionConfig::default(),
            paths: PathsConfig::default(),
            trips: TripsConfig::default(),
            split: SplitConfig::default(),
            features: FeaturesConfig::default(),
            datasets: vec![
                DatasetConfig::new("borough_shoreline", "BoroName"),
                DatasetConfig::new("borough_water", "BoroName"),
                DatasetConfig::new("state_assembly_shoreline", "AssemDist"),
                DatasetConfig::new("state_assembly_water", "AssemDist"),
            ],
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, FareHexError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, FareHexError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks resolutions, the split fraction and dataset names.
    pub fn validate(&self) -> Result<(), FareHexError> {
        let boundary = self.boundary_resolution()?;
        let point = self.point_resolution()?;
        if point < boundary {
            return Err(FareHexError::InvalidResolution(format!(
                "point resolution {} is coarser than boundary resolution {}",
                self.resolution.point, self.resolution.boundary
            )));
        }

        if !(0.0..=1.0).contains(&self.split.train_fraction) {
            return Err(FareHexError::Config(format!(
                "train_fraction must be within [0, 1], got {}",
                self.split.train_fraction
            )));
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if dataset.region_field.is_empty() {
                return Err(FareHexError::Config(format!(
                    "dataset '{}' has an empty region_field",
                    dataset.name
                )));
            }
            if !names.insert(dataset.name.as_str()) {
                return Err(FareHexError::Config(format!(
                    "dataset '{}' is defined twice",
                    dataset.name
                )));
            }
        }

        Ok(())
    }

    pub fn boundary_resolution(&self) -> Result<Resolution, FareHexError> {
        parse_resolution(self.resolution.boundary)
    }

    pub fn point_resolution(&self) -> Result<Resolution, FareHexError> {
        parse_resolution(self.resolution.point)
    }

    pub fn split_params(&self) -> SplitParams {
        SplitParams {
            train_fraction: self.split.train_fraction,
            seed: self.split.seed,
        }
    }

    pub fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            split: self.split_params(),
            week_fourier_order: self.features.week_fourier_order,
        }
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetConfig, FareHexError> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| FareHexError::Config(format!("Unknown dataset '{name}'")))
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.raw)
    }

    pub fn external_dir(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.external)
    }

    pub fn refined_dir(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.refined)
    }

    pub fn features_dir(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.features)
    }

    pub fn boundary_path(&self, dataset: &DatasetConfig) -> PathBuf {
        let file = dataset
            .file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.geojson", dataset.name)));
        self.external_dir().join(file)
    }

    pub fn cell_set_path(&self, dataset: &DatasetConfig) -> PathBuf {
        self.external_dir().join(format!("{}.parquet", dataset.name))
    }
}
