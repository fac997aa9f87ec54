use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::Result;
use crate::time_unit::TimeUnit;

/// Section read by [`ScalingSettings::from_config`] by default
pub const DEFAULT_SECTION: &str = "scaling";

fn environment() -> Environment {
    Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
}

/// Load config from a specific TOML file, overlaid with `APP_` variables
pub fn load_toml_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
        .add_source(environment())
        .build()?;
    Ok(config)
}

/// Load config from a specific YAML file, overlaid with `APP_` variables
pub fn load_yaml_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()).format(FileFormat::Yaml))
        .add_source(environment())
        .build()?;
    Ok(config)
}

/// A duration setting: shorthand such as `"30s"` or a bare number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Number(u64),
    Text(String),
}

impl DurationSetting {
    /// Bare numbers (and numeric strings) are read in `bare_unit`.
    pub fn resolve(&self, bare_unit: TimeUnit) -> Result<Duration> {
        match self {
            DurationSetting::Number(n) => TimeUnit::resolve(&n.to_string(), bare_unit),
            DurationSetting::Text(s) => TimeUnit::resolve(s, bare_unit),
        }
    }
}

/// Settings for an [`AutoScaler`](crate::AutoScaler).
///
/// ```toml
/// [scaling]
/// minimum = 1
/// maximum = 8
/// check_interval = "2m"   # bare numbers are minutes
/// stagger_offset = "250ms" # bare numbers are milliseconds
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScalingSettings {
    pub minimum: usize,
    pub maximum: usize,
    pub check_interval: DurationSetting,
    pub stagger_offset: DurationSetting,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            minimum: 1,
            maximum: 2,
            check_interval: DurationSetting::Number(20),
            stagger_offset: DurationSetting::Text("1s".to_string()),
        }
    }
}

impl ScalingSettings {
    /// Read settings from `section`, falling back to defaults for absent keys.
    pub fn from_config(config: &Config, section: &str) -> Result<Self> {
        match config.get::<ScalingSettings>(section) {
            Ok(settings) => Ok(settings),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn check_interval(&self) -> Result<Duration> {
        self.check_interval.resolve(TimeUnit::Minutes)
    }

    pub fn stagger_offset(&self) -> Result<Duration> {
        self.stagger_offset.resolve(TimeUnit::Milliseconds)
    }
}
