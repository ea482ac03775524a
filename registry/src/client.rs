const BASE_DELAY: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

use crate::config::RegistryConfig;
use crate::types::{ProviderDescriptor, RegistryRecord};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::collections::BTreeSet;
use tokio::time::{Duration, sleep};

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid registry URL: {0}")]
    InvalidUrl(String),
    #[error("registry responded with status {0}")]
    Status(StatusCode),
    #[error("registry unavailable after {0} retries")]
    RetriesExceeded(u32),
    #[error("malformed registry response: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

/// Anything that can produce the current list of provider records.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    async fn fetch_providers(&self) -> Result<Vec<RegistryRecord>, RegistryError>;
}

/// Optional narrowing of a registry search. Empty sets are not sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegistryFilter {
    pub mobility_types: BTreeSet<String>,
    pub modes: BTreeSet<String>,
    pub service_ids: BTreeSet<String>,
}

/// HTTP client for the central directory of mobility service providers.
#[derive(Clone)]
pub struct ServiceRegistryClient {
    client: reqwest::Client,
    base_url: Url,
    max_retries: u32,
    request_timeout: Duration,
}

impl ServiceRegistryClient {
    pub fn new(base_url: Url, max_retries: u32) -> Self {
        ServiceRegistryClient {
            client: reqwest::Client::new(),
            base_url,
            max_retries,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bounds each registry request, from connect until the body is read.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.url.clone(), config.max_retries)
            .with_request_timeout(config.request_timeout())
    }

    fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(path);
        Ok(url)
    }

    /// `GET {registry}/search?active=true[&mobilityTypes=..][&modes=..][&serviceIds=..]`
    ///
    /// 429 and 5xx responses are retried with exponential backoff up to
    /// `max_retries` times. A null body is treated as an empty list.
    pub async fn search(
        &self,
        filter: &RegistryFilter,
    ) -> Result<Vec<RegistryRecord>, RegistryError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let mut url = self.endpoint("search")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("active", "true");
            for (key, values) in [
                ("mobilityTypes", &filter.mobility_types),
                ("modes", &filter.modes),
                ("serviceIds", &filter.service_ids),
            ] {
                if !values.is_empty() {
                    query.append_pair(key, &join(values));
                }
            }
        }

        let mut retries = 0;

        let response = loop {
            let response = self
                .client
                .get(url.clone())
                .timeout(self.request_timeout)
                .send()
                .await?;

            if response.status().is_success() {
                break response;
            }

            if RETRIABLE_STATUS_CODES.contains(&response.status()) {
                if retries >= self.max_retries {
                    return Err(RegistryError::RetriesExceeded(retries));
                }
                // Backoff between retries
                let retry_millis = BASE_DELAY.saturating_mul(2_u64.saturating_pow(retries));
                tracing::debug!(
                    status = %response.status(),
                    retry_millis,
                    "Retrying registry search"
                );
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            return Err(RegistryError::Status(response.status()));
        };

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let records: Option<Vec<RegistryRecord>> = serde_json::from_slice(&body)?;

        Ok(records.unwrap_or_default())
    }

    /// `POST {registry}/services` with the descriptor as body. Used by provider
    /// deployments to announce themselves.
    pub async fn register(&self, descriptor: &ProviderDescriptor) -> Result<(), RegistryError> {
        let url = self.endpoint("services")?;
        let response = self
            .client
            .post(url)
            .json(descriptor)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status()));
        }

        tracing::info!(provider_id = %descriptor.id, "Registered provider");
        Ok(())
    }
}

#[async_trait]
impl ProviderSource for ServiceRegistryClient {
    async fn fetch_providers(&self) -> Result<Vec<RegistryRecord>, RegistryError> {
        self.search(&RegistryFilter::default()).await
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
