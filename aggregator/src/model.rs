//! The parts of provider payloads the broker inspects. Everything else a
//! provider sends is carried through untouched in `extra`.

use crate::errors::ProviderError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One way of getting from A to B offered by a provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leg: Option<Leg>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A payload type that can be traced back to the provider that produced it.
pub trait ProviderPayload: Serialize + DeserializeOwned + Send + 'static {
    /// Records `provider_id` as the origin unless the provider already did.
    fn attribute(&mut self, provider_id: &str);
}

impl ProviderPayload for TransportOption {
    fn attribute(&mut self, provider_id: &str) {
        if let Some(leg) = &mut self.leg
            && leg.service_id.is_none()
        {
            leg.service_id = Some(provider_id.to_string());
        }
    }
}

impl ProviderPayload for Booking {
    fn attribute(&mut self, provider_id: &str) {
        if self.service_id.is_none() {
            self.service_id = Some(provider_id.to_string());
        }
    }
}

impl ProviderPayload for Value {
    fn attribute(&mut self, _provider_id: &str) {}
}

/// Why one provider contributed nothing to an aggregate.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider_id: String,
    pub cause: ProviderError,
}

/// Result of one dispatched provider call. Failures are never folded into an
/// empty success.
#[derive(Debug)]
pub enum ProviderCallOutcome<T> {
    Success { provider_id: String, items: Vec<T> },
    Failure(ProviderFailure),
}

/// The merged answer of an aggregate call.
///
/// `items` keeps each provider's own ordering; providers appear in the
/// order their calls completed.
#[derive(Debug)]
pub struct AggregatedResult<T> {
    pub items: Vec<T>,
    pub failures: Vec<ProviderFailure>,
}

impl<T> Default for AggregatedResult<T> {
    fn default() -> Self {
        AggregatedResult {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> AggregatedResult<T> {
    pub fn push(&mut self, outcome: ProviderCallOutcome<T>) {
        match outcome {
            ProviderCallOutcome::Success { items, .. } => self.items.extend(items),
            ProviderCallOutcome::Failure(failure) => self.failures.push(failure),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

/// Decodes a list response. A blank or `null` body is an empty list.
pub fn decode_list<T: ProviderPayload>(
    provider_id: &str,
    body: &[u8],
) -> Result<Vec<T>, ProviderError> {
    if is_blank(body) {
        return Ok(Vec::new());
    }
    let items: Option<Vec<T>> =
        serde_json::from_slice(body).map_err(|e| ProviderError::MalformedBody(e.to_string()))?;
    let mut items = items.unwrap_or_default();
    for item in &mut items {
        item.attribute(provider_id);
    }
    Ok(items)
}

/// Decodes a single-object response. A blank or `null` body is a malformed
/// answer for an operation that must return something.
pub fn decode_one<T: ProviderPayload>(provider_id: &str, body: &[u8]) -> Result<T, ProviderError> {
    decode_optional(provider_id, body)?
        .ok_or_else(|| ProviderError::MalformedBody("empty response body".to_string()))
}

/// Decodes a response that may legitimately be empty.
pub fn decode_optional<T: ProviderPayload>(
    provider_id: &str,
    body: &[u8],
) -> Result<Option<T>, ProviderError> {
    if is_blank(body) {
        return Ok(None);
    }
    let item: Option<T> =
        serde_json::from_slice(body).map_err(|e| ProviderError::MalformedBody(e.to_string()))?;
    Ok(item.map(|mut item| {
        item.attribute(provider_id);
        item
    }))
}
