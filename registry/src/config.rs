use crate::cache::RefreshSchedule;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("registry url must be http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("refresh_interval_secs cannot be 0")]
    ZeroRefreshInterval,

    #[error("request_timeout_secs cannot be 0")]
    ZeroRequestTimeout,

    #[error("max_retries cannot exceed 10, got {0}")]
    TooManyRetries(u32),
}

/// Upper bound on `max_retries`; the backoff doubles with every attempt.
pub const MAX_RETRIES: u32 = 10;

fn default_refresh_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_first_snapshot_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Where the provider directory lives and how often it is polled.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct RegistryConfig {
    /// Base URL of the directory service, e.g. `http://registry.internal:8080`
    pub url: Url,
    /// Interval between scheduled refreshes. Defaults to once a day.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Delay between the startup load and the first scheduled refresh. The
    /// startup load itself runs as soon as the refresh worker starts.
    #[serde(default)]
    pub initial_delay_secs: u64,
    /// How long startup waits for the first snapshot before serving an empty one.
    #[serde(default = "default_first_snapshot_timeout_secs")]
    pub first_snapshot_timeout_secs: u64,
    /// Retries per fetch on 429/5xx responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Timeout for a single registry request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(
                self.url.scheme().to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ValidationError::ZeroRefreshInterval);
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::ZeroRequestTimeout);
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ValidationError::TooManyRetries(self.max_retries));
        }
        Ok(())
    }

    pub fn schedule(&self) -> RefreshSchedule {
        RefreshSchedule {
            interval: Duration::from_secs(self.refresh_interval_secs),
            initial_delay: Duration::from_secs(self.initial_delay_secs),
        }
    }

    pub fn first_snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.first_snapshot_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
