//! Configuration loading for Heirloom
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. an optional YAML, TOML or JSON file
//! 3. `HEIRLOOM__*` environment variables, `__` separating nested keys
//!
//! ```text
//! HEIRLOOM__SYNC__PRIMARY_REGION=eu-central-1
//! HEIRLOOM__SYNC__SYNC_REGIONS=us-east-1,ap-southeast-1
//! HEIRLOOM__LOGGING__FORMAT=json
//! ```
//!
//! Loaded settings are validated before they are returned.

pub mod error;
pub mod validation;

pub use error::{ConfigError, Result};
pub use validation::validate;

use config::{Config, Environment, File};
use heirloom_sync::SyncSettings;
use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "HEIRLOOM";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeirloomConfig {
    pub sync: SyncSettings,
    pub logging: LoggerConfig,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer `path` over the defaults. The file must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Read variables from `vars` instead of the process environment.
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn load(&self) -> Result<HeirloomConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sync.sync_regions")
                .source(self.env.clone()),
        );

        let config: HeirloomConfig = builder.build()?.try_deserialize()?;
        validate(&config)?;

        tracing::debug!(
            file = ?self.file,
            primary = %config.sync.primary_region,
            regions = config.sync.sync_regions.len(),
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Load from the process environment and, if given, a config file.
pub fn load(path: Option<&Path>) -> Result<HeirloomConfig> {
    let loader = ConfigLoader::new();
    match path {
        Some(path) => loader.with_file(path).load(),
        None => loader.load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heirloom_sync::Region;
    use logger_redacted::LogFormat;
    use std::io::Write;

    fn empty_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::new().with_env(empty_env()).load().unwrap();
        assert_eq!(config, HeirloomConfig::default());
        assert_eq!(config.sync.status_interval_ms, 5_000);
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let file = config_file(
            ".yaml",
            "sync:\n  primary_region: eu-central-1\n  sync_regions: [us-east-1, sa-east-1]\n  latency_max_ms: 300\nlogging:\n  format: json\n",
        );

        let config = ConfigLoader::new()
            .with_file(file.path())
            .with_env(empty_env())
            .load()
            .unwrap();

        assert_eq!(config.sync.primary_region, Region::EuCentral1);
        assert_eq!(config.sync.sync_regions, vec![Region::UsEast1, Region::SaEast1]);
        assert_eq!(config.sync.latency_max_ms, 300);
        assert_eq!(config.sync.latency_min_ms, 50);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = config_file(".toml", "[sync]\nstatus_interval_ms = 1000\nenabled = true\n");
        let env = HashMap::from([
            ("HEIRLOOM__SYNC__STATUS_INTERVAL_MS".to_string(), "250".to_string()),
            ("HEIRLOOM__SYNC__ENABLED".to_string(), "false".to_string()),
            (
                "HEIRLOOM__SYNC__SYNC_REGIONS".to_string(),
                "ap-northeast-1,us-west-1".to_string(),
            ),
        ]);

        let config = ConfigLoader::new()
            .with_file(file.path())
            .with_env(env)
            .load()
            .unwrap();

        assert_eq!(config.sync.status_interval_ms, 250);
        assert!(!config.sync.enabled);
        assert_eq!(
            config.sync.sync_regions,
            vec![Region::ApNortheast1, Region::UsWest1]
        );
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/heirloom.yaml")
            .with_env(empty_env())
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = config_file(".yaml", "sync:\n  latency_min_ms: 400\n  latency_max_ms: 100\n");
        let result = ConfigLoader::new()
            .with_file(file.path())
            .with_env(empty_env())
            .load();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_region_fails_to_load() {
        let file = config_file(".yaml", "sync:\n  primary_region: moon-base-1\n");
        let result = ConfigLoader::new()
            .with_file(file.path())
            .with_env(empty_env())
            .load();
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
