//! Outgoing request adapters.
//!
//! Adapters run on the caller's task while requests are built, before any
//! of them is dispatched. That is the only place caller-bound context (trace
//! ids, correlation headers) is still available.

use crate::request::ProviderRequest;
use http::Version;
use http::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use std::fmt;
use std::sync::Arc;

pub trait RequestAdapter: Send + Sync {
    fn adapt(&self, request: &mut ProviderRequest);
}

/// Marks provider calls as broker traffic with a `Via` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViaHeaderAdapter;

impl RequestAdapter for ViaHeaderAdapter {
    fn adapt(&self, request: &mut ProviderRequest) {
        shared::headers::add_via_header(&mut request.headers, Version::HTTP_11);
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StaticHeaderError {
    #[error(transparent)]
    Name(#[from] InvalidHeaderName),
    #[error(transparent)]
    Value(#[from] InvalidHeaderValue),
}

/// Adds a fixed set of headers to every provider call. Headers the request
/// already carries, such as credentials, are left alone.
#[derive(Clone, Debug, Default)]
pub struct StaticHeadersAdapter {
    headers: HeaderMap,
}

impl StaticHeadersAdapter {
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, StaticHeaderError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::try_from(name.as_ref())?;
            let value = HeaderValue::try_from(value.as_ref())?;
            headers.append(name, value);
        }
        Ok(StaticHeadersAdapter { headers })
    }
}

impl RequestAdapter for StaticHeadersAdapter {
    fn adapt(&self, request: &mut ProviderRequest) {
        for name in self.headers.keys() {
            if request.headers.contains_key(name) {
                continue;
            }
            for value in self.headers.get_all(name) {
                request.headers.append(name.clone(), value.clone());
            }
        }
    }
}

/// The ordered list of adapters applied to every built request.
#[derive(Clone, Default)]
pub struct AdapterChain {
    adapters: Vec<Arc<dyn RequestAdapter>>,
}

impl AdapterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: impl RequestAdapter + 'static) -> Self {
        self.adapters.push(Arc::new(adapter));
        self
    }

    pub fn extend(&mut self, other: AdapterChain) {
        self.adapters.extend(other.adapters);
    }

    pub fn apply(&self, request: &mut ProviderRequest) {
        for adapter in &self.adapters {
            adapter.adapt(request);
        }
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for AdapterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterChain")
            .field("adapters", &self.adapters.len())
            .finish()
    }
}
