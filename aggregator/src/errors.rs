use http::StatusCode;
use registry::Capability;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Why a single provider call did not produce a usable answer.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider responded with status {0}")]
    Status(StatusCode),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("could not build request: {0}")]
    InvalidRequest(String),

    #[error("dispatch task failed: {0}")]
    TaskFailed(String),
}

/// Consumer input rejected before any provider is contacted.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("{field} lies in the past")]
    TimeInPast { field: &'static str },

    #[error("endTime must be after startTime")]
    EndNotAfterStart,

    #[error("unknown provider id: {0}")]
    UnknownProvider(String),

    #[error("{0} must not be blank")]
    Blank(&'static str),
}

/// Errors surfaced to the caller of a broker operation.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("provider not found or not reachable: {0}")]
    ProviderNotFound(String),

    #[error("provider {provider_id} does not support {capability}")]
    CapabilityNotSupported {
        provider_id: String,
        capability: Capability,
    },

    #[error("provider {provider_id} failed: {cause}")]
    Provider {
        provider_id: String,
        cause: ProviderError,
    },
}
