//! Application configuration
//!
//! Defaults are overridden by an optional TOML file, then by `WIKITRENDS_*`
//! environment variables (a `.env` file is loaded first when present).

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Peak detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeaksConfig {
    /// Upper bound on peaks reported per page
    pub target_peak_count: usize,
}

impl Default for PeaksConfig {
    fn default() -> Self {
        Self {
            target_peak_count: 5,
        }
    }
}

/// Autocorrelation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocorrelationConfig {
    /// Trailing window in days
    pub window_days: usize,
}

impl Default for AutocorrelationConfig {
    fn default() -> Self {
        Self { window_days: 30 }
    }
}

/// Cross-correlation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossCorrelationConfig {
    pub max_lag: usize,
    /// Pairs below this signed correlation are dropped
    pub min_correlation: f64,
}

impl Default for CrossCorrelationConfig {
    fn default() -> Self {
        Self {
            max_lag: 10,
            min_correlation: 0.5,
        }
    }
}

/// ARIMA forecast settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Days forecast in plain mode
    pub steps: usize,
    /// Training share in rolling mode
    pub train_ratio: f64,
    /// Run the rolling evaluation instead of a plain forecast
    pub rolling: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            steps: 7,
            train_ratio: 0.7,
            rolling: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database holding the catalog and traffic rows
    pub database_path: PathBuf,
    /// Directory for the traffic CSV mirror and result CSVs
    pub data_dir: PathBuf,
    /// Root of the per-engine figure directories
    pub figures_dir: PathBuf,
    /// Marker file recording the last daily update
    pub update_log: PathBuf,
    /// User-Agent sent to the Wikimedia API
    pub user_agent: String,
    /// Per-request timeout of page-view fetches
    pub fetch_timeout_secs: u64,
    /// Wall-clock budget of one analysis request, unlimited when unset
    pub request_timeout_secs: Option<u64>,
    pub peaks: PeaksConfig,
    pub autocorrelation: AutocorrelationConfig,
    pub cross_correlation: CrossCorrelationConfig,
    pub forecast: ForecastConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("instance/database.db"),
            data_dir: PathBuf::from("files"),
            figures_dir: PathBuf::from("static"),
            update_log: PathBuf::from("update_log.json"),
            user_agent: format!("wikitrends/{}", env!("CARGO_PKG_VERSION")),
            fetch_timeout_secs: 30,
            request_timeout_secs: None,
            peaks: PeaksConfig::default(),
            autocorrelation: AutocorrelationConfig::default(),
            cross_correlation: CrossCorrelationConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults or `path`, then `.env` and the process environment, validated
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup; unparseable values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("WIKITRENDS_DATABASE") {
            self.database_path = PathBuf::from(val);
        }

        if let Some(val) = lookup("WIKITRENDS_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("WIKITRENDS_FIGURES_DIR") {
            self.figures_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("WIKITRENDS_USER_AGENT") {
            self.user_agent = val;
        }

        if let Some(val) = lookup("WIKITRENDS_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.request_timeout_secs = Some(secs);
            }
        }
    }

    /// Reject settings the engines cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.peaks.target_peak_count == 0 {
            return Err(ConfigError::Validation(
                "Target peak count must be greater than 0".to_string(),
            ));
        }

        if self.autocorrelation.window_days == 0 {
            return Err(ConfigError::Validation(
                "Autocorrelation window must be greater than 0".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.cross_correlation.min_correlation) {
            return Err(ConfigError::Validation(format!(
                "Minimum correlation must lie in [-1, 1], got {}",
                self.cross_correlation.min_correlation
            )));
        }

        if self.forecast.steps == 0 {
            return Err(ConfigError::Validation(
                "Forecast steps must be greater than 0".to_string(),
            ));
        }

        if self.forecast.train_ratio <= 0.0 || self.forecast.train_ratio >= 1.0 {
            return Err(ConfigError::Validation(format!(
                "Train ratio must lie strictly between 0 and 1, got {}",
                self.forecast.train_ratio
            )));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "User agent cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// CSV mirror of the traffic table
    pub fn traffic_csv(&self) -> PathBuf {
        self.data_dir.join("wiki_traffic_data.csv")
    }

    pub fn peaks_results(&self) -> PathBuf {
        self.data_dir.join("peaks_results.csv")
    }

    pub fn autocorrelation_results(&self) -> PathBuf {
        self.data_dir.join("autocorrelation_results.csv")
    }

    pub fn cross_correlation_results(&self) -> PathBuf {
        self.data_dir.join("cross_correlation.csv")
    }

    pub fn peaks_figures(&self) -> PathBuf {
        self.figures_dir.join("peaks_figures")
    }

    pub fn autocorrelation_figures(&self) -> PathBuf {
        self.figures_dir.join("auto_corr_figures")
    }

    pub fn cross_correlation_figures(&self) -> PathBuf {
        self.figures_dir.join("cross_corr_figures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database_path, PathBuf::from("instance/database.db"));
        assert_eq!(config.peaks.target_peak_count, 5);
        assert_eq!(config.autocorrelation.window_days, 30);
        assert_eq!(config.cross_correlation.max_lag, 10);
        assert_eq!(config.forecast.steps, 7);
        assert!(!config.forecast.rolling);
        assert!(config.request_timeout_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            figures_dir = "out/static"

            [forecast]
            rolling = true
            "#,
        )
        .unwrap();
        assert_eq!(config.figures_dir, PathBuf::from("out/static"));
        assert!(config.forecast.rolling);
        assert_eq!(config.forecast.steps, 7);
        assert_eq!(config.peaks_figures(), PathBuf::from("out/static/peaks_figures"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WIKITRENDS_DATA_DIR", "/tmp/files"),
            ("WIKITRENDS_TIMEOUT_SECS", "45"),
            ("WIKITRENDS_USER_AGENT", "tester/1.0"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.traffic_csv(), PathBuf::from("/tmp/files/wiki_traffic_data.csv"));
        assert_eq!(config.request_timeout_secs, Some(45));
        assert_eq!(config.user_agent, "tester/1.0");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AppConfig::default();
        config.forecast.train_ratio = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = AppConfig::default();
        config.autocorrelation.window_days = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
