//! Configuration resolution for bms-ingest
//!
//! Every setting resolves with CLI → ENV → TOML → compiled default priority.
//!
//! TOML layout (`<config dir>/bms/bms-ingest.toml`):
//!
//! ```toml
//! root_folder = "/srv/bms"
//! vision_api_key = "..."
//!
//! [logging]
//! level = "bms_ingest=info"   # used when RUST_LOG is unset
//!
//! [vision]
//! endpoint = "https://vision.example/v1/extract"
//! timeout_secs = 60
//!
//! [executor]
//! target_concurrency = 8
//!
//! [physics]
//! ohm_tolerance = 0.1
//!
//! [site]
//! latitude = 52.52
//! longitude = 13.40
//!
//! [database]
//! path = "/srv/bms/records.db"
//! ```

use bms_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::extractors::{SiteLocation, VisionClientConfig};
use crate::services::ExecutorConfig;
use crate::utils::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::validators::PhysicsPolicy;

/// Module name used for the config file and root folder lookup
pub const MODULE_NAME: &str = "bms-ingest";

pub const VISION_ENDPOINT_ENV: &str = "BMS_VISION_ENDPOINT";
pub const VISION_API_KEY_ENV: &str = "BMS_VISION_API_KEY";
pub const TARGET_CONCURRENCY_ENV: &str = "BMS_TARGET_CONCURRENCY";
pub const DATABASE_PATH_ENV: &str = "BMS_DATABASE_PATH";

/// `[database]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Explicit database file; defaults to the root folder
    pub path: Option<PathBuf>,
    /// Longest total wait on "database is locked" before giving up
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: None,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub vision_endpoint: Option<String>,
    pub vision_api_key: Option<String>,
    pub target_concurrency: Option<usize>,
    pub database_path: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub vision: VisionClientConfig,
    pub executor: ExecutorConfig,
    pub physics: PhysicsPolicy,
    /// Weather enrichment is enabled only when a site is configured
    pub site: Option<SiteLocation>,
    pub database_path: PathBuf,
    pub max_lock_wait_ms: u64,
}

impl IngestConfig {
    /// Load the TOML file at `config_path` and resolve every setting
    pub fn load(overrides: &CliOverrides, config_path: &Path) -> Result<Self> {
        let toml_config = bms_common::config::load_toml_config(config_path);
        Self::resolve(overrides, &toml_config, config_path)
    }

    /// Resolve against an already-loaded TOML config
    pub fn resolve(overrides: &CliOverrides, toml_config: &TomlConfig, config_path: &Path) -> Result<Self> {
        let mut vision: VisionClientConfig = toml_config.section("vision")?;
        let mut executor: ExecutorConfig = toml_config.section("executor")?;
        let physics: PhysicsPolicy = toml_config.section("physics")?;
        let site: Option<SiteLocation> = toml_config.section("site")?;
        let database: DatabaseSection = toml_config.section("database")?;

        if let Some(endpoint) = overrides.vision_endpoint.clone().or_else(|| env_value(VISION_ENDPOINT_ENV)) {
            vision.endpoint = endpoint;
        }
        vision.api_key = resolve_api_key(overrides, toml_config, vision.api_key.take());

        if let Some(target) = overrides.target_concurrency {
            executor.target_concurrency = target;
        } else if let Some(raw) = env_value(TARGET_CONCURRENCY_ENV) {
            executor.target_concurrency = raw.trim().parse().map_err(|_| {
                IngestError::Config(format!("{} must be a positive integer, got '{}'", TARGET_CONCURRENCY_ENV, raw))
            })?;
        }
        if executor.target_concurrency == 0 {
            return Err(IngestError::Config("Target concurrency must be at least 1".to_string()));
        }

        let database_path = match overrides
            .database_path
            .clone()
            .or_else(|| env_value(DATABASE_PATH_ENV).map(PathBuf::from))
            .or(database.path)
        {
            Some(path) => path,
            None => {
                let root_folder = RootFolderResolver::new(MODULE_NAME)
                    .with_cli_arg(overrides.root_folder.clone())
                    .with_config_path(config_path.to_path_buf())
                    .resolve();
                let initializer = RootFolderInitializer::new(root_folder);
                initializer.ensure_directory_exists()?;
                initializer.database_path()
            }
        };

        Ok(Self {
            vision,
            executor,
            physics,
            site,
            database_path,
            max_lock_wait_ms: database.max_lock_wait_ms,
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| is_valid_key(v))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// API key priority: CLI → ENV → `[vision].api_key` → top-level `vision_api_key`
fn resolve_api_key(overrides: &CliOverrides, toml_config: &TomlConfig, section_key: Option<String>) -> Option<String> {
    let candidates = [
        ("command line", overrides.vision_api_key.clone()),
        ("environment", env_value(VISION_API_KEY_ENV)),
        ("TOML [vision] section", section_key),
        ("TOML", toml_config.vision_api_key.clone()),
    ];

    let found: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if found.len() > 1 {
        let sources: Vec<&str> = found.iter().map(|(source, _)| *source).collect();
        warn!(
            "Vision API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    found.into_iter().next().map(|(source, key)| {
        info!("Vision API key loaded from {}", source);
        key
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for name in [
            VISION_ENDPOINT_ENV,
            VISION_API_KEY_ENV,
            TARGET_CONCURRENCY_ENV,
            DATABASE_PATH_ENV,
            bms_common::config::ROOT_FOLDER_ENV,
        ] {
            std::env::remove_var(name);
        }
    }

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("bms-ingest.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_defaults_place_database_under_root_folder() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        let config_path = write_config(&temp_dir, &format!("root_folder = {:?}\n", root.to_string_lossy()));

        let config = IngestConfig::load(&CliOverrides::default(), &config_path).unwrap();

        assert_eq!(config.database_path, root.join(bms_common::config::DATABASE_FILE_NAME));
        assert!(root.exists());
        assert_eq!(config.executor, ExecutorConfig::default());
        assert_eq!(config.physics, PhysicsPolicy::default());
        assert!(config.site.is_none());
        assert!(config.vision.api_key.is_none());
        assert_eq!(config.max_lock_wait_ms, DEFAULT_MAX_LOCK_WAIT_MS);
    }

    #[test]
    #[serial]
    fn test_toml_sections() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(
            &temp_dir,
            r#"
vision_api_key = "top-level"

[vision]
endpoint = "https://vision.example/v1/extract"
timeout_secs = 45

[executor]
target_concurrency = 6
slow_response_ms = 9000

[physics]
ohm_tolerance = 0.15

[site]
latitude = 52.52
longitude = 13.40

[database]
path = "/tmp/records.db"
max_lock_wait_ms = 2500
"#,
        );

        let config = IngestConfig::load(&CliOverrides::default(), &config_path).unwrap();

        assert_eq!(config.vision.endpoint, "https://vision.example/v1/extract");
        assert_eq!(config.vision.timeout_secs, 45);
        assert_eq!(config.vision.api_key.as_deref(), Some("top-level"));
        assert_eq!(config.executor.target_concurrency, 6);
        assert_eq!(config.executor.slow_response_ms, 9000);
        assert_eq!(config.executor.fast_response_ms, ExecutorConfig::default().fast_response_ms);
        assert!((config.physics.ohm_tolerance - 0.15).abs() < 1e-9);
        assert_eq!(
            config.site,
            Some(SiteLocation {
                latitude: 52.52,
                longitude: 13.40
            })
        );
        assert_eq!(config.database_path, PathBuf::from("/tmp/records.db"));
        assert_eq!(config.max_lock_wait_ms, 2500);
    }

    #[test]
    #[serial]
    fn test_logging_section_sets_filter_directive() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(
            &temp_dir,
            r#"
[logging]
level = "bms_ingest=debug"

[executor]
target_concurrency = 3
"#,
        );

        let toml_config = bms_common::config::load_toml_config(&config_path);
        assert_eq!(toml_config.logging.filter_directive(), "bms_ingest=debug");

        let config = IngestConfig::resolve(&CliOverrides::default(), &toml_config, &config_path).unwrap();
        assert_eq!(config.executor.target_concurrency, 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides_toml_and_cli_overrides_env() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(
            &temp_dir,
            r#"
[vision]
endpoint = "https://toml.example"
api_key = "toml-key"

[executor]
target_concurrency = 6

[database]
path = "/tmp/toml.db"
"#,
        );

        std::env::set_var(VISION_ENDPOINT_ENV, "https://env.example");
        std::env::set_var(VISION_API_KEY_ENV, "env-key");
        std::env::set_var(TARGET_CONCURRENCY_ENV, "3");
        std::env::set_var(DATABASE_PATH_ENV, "/tmp/env.db");

        let from_env = IngestConfig::load(&CliOverrides::default(), &config_path).unwrap();
        assert_eq!(from_env.vision.endpoint, "https://env.example");
        assert_eq!(from_env.vision.api_key.as_deref(), Some("env-key"));
        assert_eq!(from_env.executor.target_concurrency, 3);
        assert_eq!(from_env.database_path, PathBuf::from("/tmp/env.db"));

        let overrides = CliOverrides {
            vision_endpoint: Some("https://cli.example".to_string()),
            vision_api_key: Some("cli-key".to_string()),
            target_concurrency: Some(12),
            database_path: Some(PathBuf::from("/tmp/cli.db")),
            root_folder: None,
        };
        let from_cli = IngestConfig::load(&overrides, &config_path).unwrap();
        assert_eq!(from_cli.vision.endpoint, "https://cli.example");
        assert_eq!(from_cli.vision.api_key.as_deref(), Some("cli-key"));
        assert_eq!(from_cli.executor.target_concurrency, 12);
        assert_eq!(from_cli.database_path, PathBuf::from("/tmp/cli.db"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_blank_env_values_are_ignored() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "[vision]\napi_key = \"toml-key\"\n[database]\npath = \"/tmp/a.db\"\n");

        std::env::set_var(VISION_API_KEY_ENV, "   ");
        let config = IngestConfig::load(&CliOverrides::default(), &config_path).unwrap();
        assert_eq!(config.vision.api_key.as_deref(), Some("toml-key"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_target_concurrency() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "[database]\npath = \"/tmp/a.db\"\n");

        std::env::set_var(TARGET_CONCURRENCY_ENV, "many");
        let result = IngestConfig::load(&CliOverrides::default(), &config_path);
        assert!(matches!(result, Err(IngestError::Config(_))));
        clear_env();

        let zero = CliOverrides {
            target_concurrency: Some(0),
            ..Default::default()
        };
        assert!(matches!(IngestConfig::load(&zero, &config_path), Err(IngestError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_malformed_section_is_a_config_error() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "[executor]\ntarget_concurrency = \"eight\"\n");

        let result = IngestConfig::load(&CliOverrides::default(), &config_path);
        assert!(matches!(result, Err(IngestError::Common(bms_common::Error::Config(_)))));
    }
}
