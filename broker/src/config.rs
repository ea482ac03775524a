use aggregator::adapters::{StaticHeaderError, StaticHeadersAdapter};
use aggregator::config::DispatchConfig;
use registry::config::RegistryConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3001,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub admin_listener: Listener,
    /// Extra headers sent with every provider call.
    #[serde(default)]
    pub outgoing_headers: BTreeMap<String, String>,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.validate()?;
        self.dispatch.validate()?;
        if self.admin_listener.port == 0 {
            return Err(ConfigError::InvalidPort("admin_listener"));
        }
        if let Some(metrics) = &self.metrics
            && metrics.statsd_port == 0
        {
            return Err(ConfigError::InvalidPort("metrics"));
        }
        self.outgoing_headers_adapter()?;
        Ok(())
    }

    pub fn outgoing_headers_adapter(&self) -> Result<StaticHeadersAdapter, ConfigError> {
        Ok(StaticHeadersAdapter::from_pairs(&self.outgoing_headers)?)
    }

    pub fn sentry_dsn(&self) -> Option<&str> {
        self.logging
            .as_ref()
            .and_then(|logging| logging.sentry_dsn.as_deref())
            .filter(|dsn| !dsn.trim().is_empty())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid registry config: {0}")]
    Registry(#[from] registry::config::ValidationError),
    #[error("invalid dispatch config: {0}")]
    Dispatch(#[from] aggregator::config::ValidationError),
    #[error("{0} port cannot be 0")]
    InvalidPort(&'static str),
    #[error("invalid outgoing header: {0}")]
    OutgoingHeader(#[from] StaticHeaderError),
}
