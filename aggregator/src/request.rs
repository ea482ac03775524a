use crate::credentials::{Credential, X_CREDENTIALS, X_TOKEN};
use crate::errors::ProviderError;
use crate::model::Booking;
use crate::query::{BookingsQuery, OptionsQuery};
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};
use registry::ProviderDescriptor;
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// A fully formed provider call that has not been executed yet.
#[derive(Clone)]
pub struct ProviderRequest {
    pub provider_id: String,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if is_credential_header(name) {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.to_str().unwrap_or("<binary>"))
                }
            })
            .collect();

        f.debug_struct("ProviderRequest")
            .field("provider_id", &self.provider_id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

fn is_credential_header(name: &http::HeaderName) -> bool {
    *name == X_TOKEN || *name == X_CREDENTIALS
}

/// Builds outbound provider requests. Building is pure: no I/O, no state.
///
/// A query parameter is attached only when it carries a meaningful value, so
/// providers never see keys with empty or placeholder values.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProviderRequestBuilder;

impl ProviderRequestBuilder {
    pub fn new() -> Self {
        ProviderRequestBuilder
    }

    /// `GET {base}/options?from=..[&to=..][&startTime=..][&endTime=..][&radiusMeter=..]
    /// [&sharingAllowed=..][&modesAllowed=..][&limitTo=..]`
    pub fn options(
        &self,
        provider: &ProviderDescriptor,
        query: &OptionsQuery,
        credential: Option<&Credential>,
    ) -> Result<ProviderRequest, ProviderError> {
        let mut url = endpoint(provider, &["options"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("from", &query.from.to_string());
            if let Some(to) = &query.to {
                pairs.append_pair("to", &to.to_string());
            }
            if let Some(millis) = query.start_time.and_then(epoch_millis) {
                pairs.append_pair("startTime", &millis.to_string());
            }
            if let Some(millis) = query.end_time.and_then(epoch_millis) {
                pairs.append_pair("endTime", &millis.to_string());
            }
            if let Some(radius) = query.radius_meters.filter(|r| *r >= 0) {
                pairs.append_pair("radiusMeter", &radius.to_string());
            }
            if let Some(sharing) = query.sharing_allowed {
                pairs.append_pair("sharingAllowed", if sharing { "true" } else { "false" });
            }
            if !query.modes().is_empty() {
                pairs.append_pair("modesAllowed", &join(query.modes()));
            }
            if let Some(limit) = query.limit.filter(|l| *l > 0) {
                pairs.append_pair("limitTo", &limit.to_string());
            }
        }

        request(provider, Method::GET, url, credential, None)
    }

    /// `GET {base}/bookings[?state=..]`
    pub fn bookings(
        &self,
        provider: &ProviderDescriptor,
        query: &BookingsQuery,
        credential: Option<&Credential>,
    ) -> Result<ProviderRequest, ProviderError> {
        let mut url = endpoint(provider, &["bookings"])?;
        if let Some(state) = non_blank(query.state.as_deref()) {
            url.query_pairs_mut().append_pair("state", state);
        }

        request(provider, Method::GET, url, credential, None)
    }

    /// `GET {base}/bookings/{id}`
    pub fn booking(
        &self,
        provider: &ProviderDescriptor,
        booking_id: &str,
        credential: Option<&Credential>,
    ) -> Result<ProviderRequest, ProviderError> {
        let booking_id = required("booking id", booking_id)?;
        let url = endpoint(provider, &["bookings", booking_id])?;

        request(provider, Method::GET, url, credential, None)
    }

    /// `POST {base}/bookings`
    pub fn create_booking(
        &self,
        provider: &ProviderDescriptor,
        booking: &Booking,
        credential: Option<&Credential>,
    ) -> Result<ProviderRequest, ProviderError> {
        let url = endpoint(provider, &["bookings"])?;

        request(provider, Method::POST, url, credential, Some(json_body(booking)?))
    }

    /// `PUT {base}/bookings/{id}`
    pub fn modify_booking(
        &self,
        provider: &ProviderDescriptor,
        booking_id: &str,
        booking: &Booking,
        credential: Option<&Credential>,
    ) -> Result<ProviderRequest, ProviderError> {
        let booking_id = required("booking id", booking_id)?;
        let url = endpoint(provider, &["bookings", booking_id])?;

        request(provider, Method::PUT, url, credential, Some(json_body(booking)?))
    }

    /// `POST {base}/bookings/{id}/action/{action}[?secret=..]`
    pub fn action(
        &self,
        provider: &ProviderDescriptor,
        booking_id: &str,
        action: &str,
        secret: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<ProviderRequest, ProviderError> {
        let booking_id = required("booking id", booking_id)?;
        let action = required("action", action)?;
        let mut url = endpoint(provider, &["bookings", booking_id, "action", action])?;
        if let Some(secret) = non_blank(secret) {
            url.query_pairs_mut().append_pair("secret", secret);
        }

        request(provider, Method::POST, url, credential, None)
    }
}

fn endpoint(provider: &ProviderDescriptor, segments: &[&str]) -> Result<Url, ProviderError> {
    let mut url = provider.base_url.clone();
    url.path_segments_mut()
        .map_err(|_| {
            ProviderError::InvalidRequest(format!("{} cannot be a base url", provider.base_url))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn request(
    provider: &ProviderDescriptor,
    method: Method,
    url: Url,
    credential: Option<&Credential>,
    body: Option<Bytes>,
) -> Result<ProviderRequest, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if let Some(credential) = credential {
        let mut value = HeaderValue::from_str(credential.expose()).map_err(|_| {
            ProviderError::InvalidRequest(format!(
                "credential {} is not a valid header value",
                credential.redacted()
            ))
        })?;
        value.set_sensitive(true);
        headers.insert(credential.header_name(), value);
    }

    Ok(ProviderRequest {
        provider_id: provider.id.clone(),
        method,
        url,
        headers,
        body,
    })
}

fn json_body(booking: &Booking) -> Result<Bytes, ProviderError> {
    serde_json::to_vec(booking)
        .map(Bytes::from)
        .map_err(|e| ProviderError::InvalidRequest(e.to_string()))
}

fn required<'a>(what: &str, value: &'a str) -> Result<&'a str, ProviderError> {
    non_blank(Some(value)).ok_or_else(|| ProviderError::InvalidRequest(format!("{what} is blank")))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn epoch_millis(time: SystemTime) -> Option<u128> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_millis())
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
