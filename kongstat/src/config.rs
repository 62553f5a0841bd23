use collector::config::Config as CollectorConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            sentry_dsn: None,
        }
    }
}

fn default_level() -> String {
    "info".into()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
