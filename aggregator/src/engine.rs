use crate::adapters::AdapterChain;
use crate::credentials::{Credential, CredentialBundle, CredentialRouter};
use crate::errors::{ProviderError, Result, ValidationError};
use crate::executor::FanOutExecutor;
use crate::metrics_defs::AGGREGATE_PROVIDERS_CONTACTED;
use crate::model::{AggregatedResult, Booking, ProviderFailure, ProviderPayload, TransportOption};
use crate::query::{BookingsQuery, OptionsQuery};
use crate::request::{ProviderRequest, ProviderRequestBuilder};
use registry::types::normalize_tags;
use registry::{Capability, ProviderCache, ProviderDescriptor, RegistrySnapshot};
use shared::histogram;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

/// Which providers an aggregate call goes to. Empty sets are no constraint.
#[derive(Clone, Copy, Debug)]
pub struct ProviderSelection<'a> {
    pub capability: Capability,
    pub modes: &'a BTreeSet<String>,
    pub mobility_types: &'a BTreeSet<String>,
    pub provider_ids: &'a BTreeSet<String>,
}

impl ProviderSelection<'_> {
    /// The matching providers in snapshot order. Every explicitly requested id
    /// must exist in the snapshot, whether or not it then matches. Mode and
    /// mobility type tags match case-insensitively.
    pub fn apply(
        &self,
        snapshot: &RegistrySnapshot,
    ) -> Result<Vec<Arc<ProviderDescriptor>>, ValidationError> {
        if let Some(unknown) = self.provider_ids.iter().find(|id| !snapshot.contains(id)) {
            return Err(ValidationError::UnknownProvider(unknown.clone()));
        }

        let modes = normalize_tags(Some(self.modes));
        let mobility_types = normalize_tags(Some(self.mobility_types));

        Ok(snapshot
            .iter()
            .filter(|provider| provider.supports(self.capability))
            .filter(|provider| {
                self.provider_ids.is_empty() || self.provider_ids.contains(&provider.id)
            })
            .filter(|provider| provider.matches_modes(&modes))
            .filter(|provider| provider.matches_mobility_types(&mobility_types))
            .cloned()
            .collect())
    }
}

/// Fans one consumer request out to every matching provider and merges the
/// answers.
///
/// Requests are built one after another on the calling task, adapters
/// included, and only then handed to the executor. Individual provider
/// failures end up in [`AggregatedResult::failures`]; they never fail the
/// aggregate call.
#[derive(Clone)]
pub struct AggregationEngine {
    cache: ProviderCache,
    credentials: CredentialRouter,
    builder: ProviderRequestBuilder,
    adapters: AdapterChain,
    executor: FanOutExecutor,
}

impl AggregationEngine {
    pub fn new(cache: ProviderCache, executor: FanOutExecutor, adapters: AdapterChain) -> Self {
        AggregationEngine {
            cache,
            credentials: CredentialRouter::new(),
            builder: ProviderRequestBuilder::new(),
            adapters,
            executor,
        }
    }

    pub async fn get_options(
        &self,
        query: &OptionsQuery,
        credentials: &CredentialBundle,
    ) -> Result<AggregatedResult<TransportOption>> {
        query.validate(SystemTime::now())?;

        let snapshot = self.cache.current();
        let providers = ProviderSelection {
            capability: Capability::Options,
            modes: query.modes(),
            mobility_types: query.mobility_types(),
            provider_ids: &query.provider_ids,
        }
        .apply(&snapshot)?;

        Ok(self
            .fan_out("options", &providers, credentials, |provider, credential| {
                self.builder.options(provider, query, credential)
            })
            .await)
    }

    pub async fn get_bookings(
        &self,
        query: &BookingsQuery,
        credentials: &CredentialBundle,
    ) -> Result<AggregatedResult<Booking>> {
        let no_constraint = BTreeSet::new();
        let snapshot = self.cache.current();
        let providers = ProviderSelection {
            capability: Capability::Booking,
            modes: &no_constraint,
            mobility_types: &no_constraint,
            provider_ids: &query.provider_ids,
        }
        .apply(&snapshot)?;

        Ok(self
            .fan_out("bookings", &providers, credentials, |provider, credential| {
                self.builder.bookings(provider, query, credential)
            })
            .await)
    }

    async fn fan_out<T, F>(
        &self,
        operation: &'static str,
        providers: &[Arc<ProviderDescriptor>],
        credentials: &CredentialBundle,
        build: F,
    ) -> AggregatedResult<T>
    where
        T: ProviderPayload,
        F: Fn(&ProviderDescriptor, Option<&Credential>) -> Result<ProviderRequest, ProviderError>,
    {
        // Build phase: sequential, on this task
        let mut requests = Vec::with_capacity(providers.len());
        let mut build_failures = Vec::new();
        for provider in providers {
            let credential = self.credentials.route(credentials, &provider.id);
            match build(provider.as_ref(), credential) {
                Ok(mut request) => {
                    self.adapters.apply(&mut request);
                    requests.push(request);
                }
                Err(cause) => {
                    tracing::warn!(
                        provider_id = %provider.id,
                        error = %cause,
                        operation,
                        "Could not build provider request"
                    );
                    build_failures.push(ProviderFailure {
                        provider_id: provider.id.clone(),
                        cause,
                    });
                }
            }
        }

        histogram!(AGGREGATE_PROVIDERS_CONTACTED).record(requests.len() as f64);
        let contacted = requests.len();

        // Dispatch phase: concurrent
        let mut result = self.executor.dispatch::<T>(requests).await;
        result.failures.extend(build_failures);

        tracing::info!(
            operation,
            providers = contacted,
            items = result.items.len(),
            failures = result.failures.len(),
            "Aggregate call complete"
        );

        result
    }
}
