//! Ambient application configuration: TOML file plus `TASKGRAPH_*`
//! environment overrides, loaded through a `ConfigLoader`/`AppConfig` pair.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{WorkflowError, WorkflowResult};

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> WorkflowResult<AppConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> WorkflowResult<AppConfig> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TASKGRAPH_*` overrides on top of an already-loaded config
    /// (file values win unless an env var is set).
    pub fn apply_env_overrides(mut config: AppConfig) -> WorkflowResult<AppConfig> {
        if let Ok(val) = std::env::var("TASKGRAPH_LOG_LEVEL") {
            config.logging.level = val;
        }
        if let Ok(val) = std::env::var("TASKGRAPH_PARALLELISM") {
            config.engine.parallelism = val
                .parse()
                .map_err(|_| WorkflowError::Config(format!("TASKGRAPH_PARALLELISM must be a positive integer, got {val}")))?;
        }
        if let Ok(val) = std::env::var("TASKGRAPH_WORK_DIR") {
            config.persistence.work_dir = val;
        }
        if let Ok(val) = std::env::var("TASKGRAPH_PRUNE") {
            config.engine.prune = parse_bool(&val)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply env overrides; falls back to
    /// defaults if no file is given.
    pub fn load(path: Option<&Path>) -> WorkflowResult<AppConfig> {
        let config = match path {
            Some(p) => Self::load_from_file(p)?,
            None => AppConfig::default(),
        };
        Self::apply_env_overrides(config)
    }
}

fn parse_bool(raw: &str) -> WorkflowResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(WorkflowError::Config(format!(
            "TASKGRAPH_PRUNE must be a boolean, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub persistence: PersistenceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> WorkflowResult<()> {
        self.engine.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallelism: usize,
    pub prune: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: num_cpus::get(),
            prune: true,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> WorkflowResult<()> {
        if self.parallelism == 0 {
            return Err(WorkflowError::Config("engine.parallelism must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> WorkflowResult<()> {
        const VALID: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !VALID.contains(&self.level.as_str()) {
            return Err(WorkflowError::Config(format!(
                "invalid log level: {}",
                self.level
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub work_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            work_dir: ".taskgraph".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn loads_partial_toml_with_defaults_filled_in() {
        let config = ConfigLoader::load_from_str(
            r#"
            [engine]
            parallelism = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.parallelism, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_invalid_log_level() {
        let result = ConfigLoader::load_from_str(
            r#"
            [logging]
            level = "verbose"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("TASKGRAPH_LOG_LEVEL", "debug");
        let config = ConfigLoader::apply_env_overrides(AppConfig::default()).unwrap();
        assert_eq!(config.logging.level, "debug");
        std::env::remove_var("TASKGRAPH_LOG_LEVEL");
    }
}
