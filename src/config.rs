use crate::core_types::{DEFAULT_PAR, Price, Symbol};
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// When false the per-fill `orderflow` target is silenced
    pub enable_tracing: bool,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Markets created at startup
    #[serde(default)]
    pub markets: Vec<Symbol>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Settlement value of one winning share; YES at p pairs with NO at par - p
    pub par: Price,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { par: DEFAULT_PAR }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.par < 2 {
            return Err(ConfigError::Invalid(format!(
                "engine.par must be at least 2, got {}",
                self.engine.par
            )));
        }
        if !matches!(self.rotation.as_str(), "hourly" | "daily" | "never") {
            return Err(ConfigError::Invalid(format!(
                "rotation must be hourly, daily or never, got {}",
                self.rotation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
log_level: info
log_dir: ./logs
log_file: exchange.log
use_json: false
rotation: daily
enable_tracing: true
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml_str(BASE).unwrap();
        assert_eq!(config.engine.par, 1000);
        assert!(config.markets.is_empty());
    }

    #[test]
    fn test_engine_and_markets() {
        let yaml = format!("{}engine:\n  par: 100\nmarkets: [BTC-100K, RAIN-NYC]\n", BASE);
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.engine, EngineConfig { par: 100 });
        assert_eq!(config.markets, vec!["BTC-100K", "RAIN-NYC"]);
    }

    #[test]
    fn test_par_too_small() {
        let yaml = format!("{}engine:\n  par: 1\n", BASE);
        assert!(matches!(
            AppConfig::from_yaml_str(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(
            AppConfig::from_yaml_str("log_level: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::load("no-such-env"),
            Err(ConfigError::Read { .. })
        ));
    }
}
