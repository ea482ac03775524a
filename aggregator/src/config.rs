use serde::Deserialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("provider_timeout_secs cannot be 0")]
    ZeroProviderTimeout,

    #[error("max_concurrent_requests cannot be 0")]
    ZeroConcurrency,

    #[error("aggregate_timeout_secs cannot be 0")]
    ZeroAggregateTimeout,
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    32
}

/// How provider calls are dispatched.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct DispatchConfig {
    /// Timeout for each individual provider call.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Upper bound on provider calls in flight at once.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Optional deadline for a whole aggregate call. Providers that have not
    /// answered by then are reported as timed out.
    #[serde(default)]
    pub aggregate_timeout_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            provider_timeout_secs: default_provider_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            aggregate_timeout_secs: None,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.provider_timeout_secs == 0 {
            return Err(ValidationError::ZeroProviderTimeout);
        }
        if self.max_concurrent_requests == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        if self.aggregate_timeout_secs == Some(0) {
            return Err(ValidationError::ZeroAggregateTimeout);
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn aggregate_timeout(&self) -> Option<Duration> {
        self.aggregate_timeout_secs.map(Duration::from_secs)
    }
}
