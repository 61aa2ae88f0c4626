use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::validate_branch_name;

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".fanin";

/// Prefix of environment variable overrides, e.g. `FANIN_MERGE__CHUNK_SIZE`.
pub const ENV_PREFIX: &str = "FANIN_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid chunk_size: {0}. Must be at least 1")]
    InvalidChunkSize(usize),

    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Unsupported scheduler kind: {0}")]
    UnsupportedScheduler(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .fanin/config.yaml (project config)
    /// 3. .fanin/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FANIN_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let dir = Path::new(CONFIG_DIR);
        let config: Config = Self::figment(&[&dir.join("config.yaml"), &dir.join("local.yaml")])
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring environment
    /// overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }

        let config: Config = Self::figment(&[path])
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(files: &[&Path]) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        for file in files {
            figment = figment.merge(Yaml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.cohort.branch_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "cohort.branch_prefix cannot be empty".to_string(),
            ));
        }
        validate_branch_name(&config.cohort.branch_prefix)
            .map_err(|e| ConfigError::ValidationFailed(format!("cohort.branch_prefix: {e}")))?;

        if config.scheduler.kind != "slurm" {
            return Err(ConfigError::UnsupportedScheduler(
                config.scheduler.kind.clone(),
            ));
        }
        if config.scheduler.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(
                config.scheduler.max_attempts,
            ));
        }

        validate_branch_name(&config.store.default_branch)
            .map_err(|e| ConfigError::ValidationFailed(format!("store.default_branch: {e}")))?;
        if config.store.workdir.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store.workdir cannot be empty".to_string(),
            ));
        }

        if config.merge.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(config.merge.chunk_size));
        }
        if config.merge.lock_ttl_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "merge.lock_ttl_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.merge.chunk_size, 2000);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.cohort.branch_prefix, "job");
        assert_eq!(config.store.default_branch, "main");
        assert_eq!(config.store.content_remote, "output-storage");
        assert_eq!(config.database.path, ".fanin/ledger.db");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /scratch/ledger.db
cohort:
  manifest_path: inputs/participants.tsv
merge:
  chunk_size: 500
store:
  remote_url: ria+file:///data/store#~project
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/scratch/ledger.db");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.cohort.manifest_path, "inputs/participants.tsv");
        assert_eq!(config.cohort.branch_prefix, "job");
        assert_eq!(config.merge.chunk_size, 500);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_chunk_size() {
        let mut config = Config::default();
        config.merge.chunk_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(level)) if level == "verbose"
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 60_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(60_000, 30_000))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_branch_prefix_and_scheduler() {
        let mut config = Config::default();
        config.cohort.branch_prefix = "-x".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));

        let mut config = Config::default();
        config.scheduler.kind = "pbs".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnsupportedScheduler(_))
        ));
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "merge:\n  chunk_size: 100\nlogging:\n  level: info").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("FANIN_MERGE__CHUNK_SIZE", Some("5")),
                ("FANIN_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.merge.chunk_size, 5, "Env should win over file");
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.logging.format, "pretty", "Default should persist");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "merge:\n  chunk_size: 50\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "merge:\n  chunk_size: 10\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = ConfigLoader::figment(&[base_file.path(), override_file.path()])
            .extract()
            .unwrap();

        assert_eq!(config.merge.chunk_size, 10, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(ConfigLoader::load_from_file("/nonexistent/fanin.yaml").is_err());
    }
}
