use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::crosswalk::{ResolverOptions, SearchRadius, CONFIDENT_RADIUS_M};
use crate::error::ConfigError;
use crate::metrics::{MetricsConfig, DEFAULT_POOLED_MIN_PAIRS, DEFAULT_REGION_MIN_PAIRS};
use crate::region::{default_region_boxes, RegionBox, RegionClassifier, DEFAULT_OTHER_LABEL};
use crate::sources::http::HttpSettings;
use crate::sources::nldi::DEFAULT_NLDI_URL;
use crate::sources::nwis::{DEFAULT_CHUNK_SIZE, DEFAULT_NWIS_DV_URL};
use crate::types::FlowUnit;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_other_label")]
    pub other_label: String,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub crosswalk: CrosswalkConfig,
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default = "default_region_boxes")]
    pub regions: Vec<RegionBox>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub catalog_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Spatial,
    Identifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosswalkConfig {
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default)]
    pub backend: BackendKind,
    /// `reach_id,longitude,latitude` CSV backing the spatial index.
    #[serde(default)]
    pub reach_points_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_pooled_min_pairs")]
    pub pooled_min_pairs: usize,
    #[serde(default = "default_region_min_pairs")]
    pub region_min_pairs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_true")]
    pub gauge_enabled: bool,
    #[serde(default = "default_gauge_url")]
    pub gauge_url: String,
    #[serde(default = "default_nldi_url")]
    pub nldi_url: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub model_table: String,
    #[serde(default = "default_model_unit")]
    pub model_unit: FlowUnit,
    #[serde(default)]
    pub reach_model_table: String,
    #[serde(default = "default_reach_model_unit")]
    pub reach_model_unit: FlowUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub target_date: Option<NaiveDate>,
    pub radius_m: Option<f64>,
    pub catalog_path: Option<PathBuf>,
    pub backend: Option<BackendKind>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/streamflow-validator/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(date) = overrides.target_date {
            self.run.target_date = Some(date);
        }
        if let Some(radius_m) = overrides.radius_m {
            self.crosswalk.radius_m = radius_m;
        }
        if let Some(path) = overrides.catalog_path {
            self.run.catalog_path = path.display().to_string();
        }
        if let Some(backend) = overrides.backend {
            self.crosswalk.backend = backend;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn region_classifier(&self) -> Result<RegionClassifier, ConfigError> {
        RegionClassifier::new(self.regions.clone(), self.other_label.clone())
    }

    pub fn search_radius(&self) -> Result<SearchRadius, ConfigError> {
        SearchRadius::meters(self.crosswalk.radius_m)
    }

    pub fn resolver_options(&self) -> Result<ResolverOptions, ConfigError> {
        ResolverOptions::new(
            self.search_radius()?,
            self.crosswalk.concurrency,
            Duration::from_millis(self.crosswalk.lookup_timeout_ms),
        )
    }

    pub fn metrics_config(&self) -> Result<MetricsConfig, ConfigError> {
        MetricsConfig::new(self.metrics.pooled_min_pairs, self.metrics.region_min_pairs)
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.sources.timeout_secs),
            connect_timeout: Duration::from_secs(self.sources.connect_timeout_secs),
            ..HttpSettings::default()
        }
    }

    pub fn default_template() -> String {
        let template = r#"other_label = "Other"

[run]
# target_date = "2024-07-15"
catalog_path = "~/.local/share/streamflow-validator/pour_points.geojson"

[crosswalk]
radius_m = 500.0
concurrency = 10
lookup_timeout_ms = 10000
backend = "spatial"
reach_points_path = "~/.local/share/streamflow-validator/reach_points.csv"

[metrics]
pooled_min_pairs = 10
region_min_pairs = 5

[[regions]]
label = "TX"
min_lon = -107.0
max_lon = -93.0
min_lat = 25.0
max_lat = 37.0

[[regions]]
label = "CA"
min_lon = -125.0
max_lon = -114.0
min_lat = 32.0
max_lat = 42.0

[[regions]]
label = "NC"
min_lon = -85.0
max_lon = -75.0
min_lat = 33.0
max_lat = 37.0

[sources]
gauge_enabled = true
gauge_url = "https://waterservices.usgs.gov/nwis/dv/"
nldi_url = "https://labs.waterdata.usgs.gov/api/nldi/linked-data"
chunk_size = 100
timeout_secs = 60
connect_timeout_secs = 10
model_table = "~/.local/share/streamflow-validator/model.csv"
model_unit = "cfs"
reach_model_table = "~/.local/share/streamflow-validator/reach_model.csv"
reach_model_unit = "cms"

[storage]
db_path = "~/.local/share/streamflow-validator/validator.db"
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Expands a configured path, treating an empty string as unset.
pub fn optional_path(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(expand_tilde(trimmed))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            other_label: default_other_label(),
            run: RunConfig::default(),
            crosswalk: CrosswalkConfig::default(),
            metrics: MetricsSection::default(),
            regions: default_region_boxes(),
            sources: SourcesConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for CrosswalkConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            concurrency: default_concurrency(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            backend: BackendKind::default(),
            reach_points_path: String::new(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            pooled_min_pairs: default_pooled_min_pairs(),
            region_min_pairs: default_region_min_pairs(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            gauge_enabled: true,
            gauge_url: default_gauge_url(),
            nldi_url: default_nldi_url(),
            chunk_size: default_chunk_size(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            model_table: String::new(),
            model_unit: default_model_unit(),
            reach_model_table: String::new(),
            reach_model_unit: default_reach_model_unit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_other_label() -> String {
    DEFAULT_OTHER_LABEL.to_string()
}

fn default_radius_m() -> f64 {
    CONFIDENT_RADIUS_M
}

fn default_concurrency() -> usize {
    10
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

fn default_pooled_min_pairs() -> usize {
    DEFAULT_POOLED_MIN_PAIRS
}

fn default_region_min_pairs() -> usize {
    DEFAULT_REGION_MIN_PAIRS
}

fn default_gauge_url() -> String {
    DEFAULT_NWIS_DV_URL.to_string()
}

fn default_nldi_url() -> String {
    DEFAULT_NLDI_URL.to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_model_unit() -> FlowUnit {
    FlowUnit::CubicFeetPerSecond
}

fn default_reach_model_unit() -> FlowUnit {
    FlowUnit::CubicMetersPerSecond
}

fn default_db_path() -> String {
    "~/.local/share/streamflow-validator/validator.db".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("template");
        let defaults = Config::default();
        assert_eq!(parsed.crosswalk.radius_m, defaults.crosswalk.radius_m);
        assert_eq!(parsed.crosswalk.backend, BackendKind::Spatial);
        assert_eq!(parsed.regions, defaults.regions);
        assert_eq!(parsed.sources.reach_model_unit, FlowUnit::CubicMetersPerSecond);
        assert_eq!(parsed.metrics.pooled_min_pairs, 10);
        assert_eq!(parsed.metrics.region_min_pairs, 5);
        assert!(parsed.run.target_date.is_none());
    }

    #[test]
    fn sparse_file_falls_back_per_field() {
        let parsed: Config = toml::from_str(
            "[crosswalk]\nradius_m = 1000.0\nbackend = \"identifier\"\n\n[run]\ntarget_date = \"2024-07-15\"\n",
        )
        .expect("sparse");
        assert_eq!(parsed.crosswalk.radius_m, 1000.0);
        assert_eq!(parsed.crosswalk.concurrency, 10);
        assert_eq!(parsed.crosswalk.backend, BackendKind::Identifier);
        assert_eq!(parsed.regions.len(), 3);
        assert_eq!(
            parsed.run.target_date,
            NaiveDate::from_ymd_opt(2024, 7, 15)
        );
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            target_date: NaiveDate::from_ymd_opt(2024, 8, 1),
            radius_m: Some(1_000.0),
            catalog_path: Some(PathBuf::from("/tmp/points.geojson")),
            backend: Some(BackendKind::Identifier),
        });
        assert_eq!(config.crosswalk.radius_m, 1_000.0);
        assert_eq!(config.run.catalog_path, "/tmp/points.geojson");
        assert_eq!(config.crosswalk.backend, BackendKind::Identifier);
        assert_eq!(config.search_radius().expect("radius").as_meters(), 1_000.0);
    }

    #[test]
    fn invalid_values_surface_as_config_errors() {
        let mut config = Config::default();
        config.crosswalk.radius_m = 0.0;
        assert_eq!(config.search_radius().err(), Some(ConfigError::InvalidRadius(0.0)));
        config.crosswalk.radius_m = 500.0;
        config.crosswalk.concurrency = 0;
        assert!(matches!(config.resolver_options(), Err(ConfigError::ZeroConcurrency)));
        config.metrics.region_min_pairs = 1;
        assert_eq!(config.metrics_config().err(), Some(ConfigError::MinPairsTooSmall(1)));
        config.regions.push(RegionBox::new("bad", 10.0, 0.0, 0.0, 1.0));
        assert!(config.region_classifier().is_err());
    }

    #[test]
    fn empty_paths_are_unset() {
        assert!(optional_path("  ").is_none());
        assert_eq!(optional_path("/data/x.csv"), Some(PathBuf::from("/data/x.csv")));
    }
}
