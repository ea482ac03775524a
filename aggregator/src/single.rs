use crate::adapters::AdapterChain;
use crate::credentials::{Credential, CredentialBundle, CredentialRouter};
use crate::errors::{BrokerError, ProviderError, Result, ValidationError};
use crate::executor::call_provider;
use crate::model::{Booking, decode_one, decode_optional};
use crate::request::{ProviderRequest, ProviderRequestBuilder};
use crate::transport::Transport;
use registry::{Capability, ProviderCache, ProviderDescriptor};
use std::sync::Arc;

/// Forwards operations that target exactly one provider.
///
/// Unlike aggregate calls there is nothing to fall back on, so a missing
/// provider and the provider's own failure both reach the caller.
#[derive(Clone)]
pub struct SingleProviderRouter {
    cache: ProviderCache,
    credentials: CredentialRouter,
    builder: ProviderRequestBuilder,
    adapters: AdapterChain,
    transport: Arc<dyn Transport>,
}

impl SingleProviderRouter {
    pub fn new(
        cache: ProviderCache,
        transport: Arc<dyn Transport>,
        adapters: AdapterChain,
    ) -> Self {
        SingleProviderRouter {
            cache,
            credentials: CredentialRouter::new(),
            builder: ProviderRequestBuilder::new(),
            adapters,
            transport,
        }
    }

    /// Looks `provider_id` up in the current snapshot.
    pub fn resolve(
        &self,
        provider_id: &str,
        capability: Capability,
    ) -> Result<Arc<ProviderDescriptor>> {
        let provider_id = required("providerId", provider_id)?;
        let snapshot = self.cache.current();
        let provider = snapshot
            .get(provider_id)
            .cloned()
            .ok_or_else(|| BrokerError::ProviderNotFound(provider_id.to_string()))?;

        if !provider.supports(capability) {
            return Err(BrokerError::CapabilityNotSupported {
                provider_id: provider.id.clone(),
                capability,
            });
        }
        Ok(provider)
    }

    /// Resolves the provider, builds exactly one request and executes it.
    pub async fn forward<R>(
        &self,
        provider_id: &str,
        capability: Capability,
        credentials: &CredentialBundle,
        build: impl FnOnce(
            &ProviderRequestBuilder,
            &ProviderDescriptor,
            Option<&Credential>,
        ) -> Result<ProviderRequest, ProviderError>,
        decode: impl FnOnce(&str, &[u8]) -> Result<R, ProviderError>,
    ) -> Result<R> {
        let provider = self.resolve(provider_id, capability)?;
        let credential = self.credentials.route(credentials, &provider.id);

        let mut request = build(&self.builder, provider.as_ref(), credential).map_err(|cause| {
            BrokerError::Provider {
                provider_id: provider.id.clone(),
                cause,
            }
        })?;
        self.adapters.apply(&mut request);

        call_provider(self.transport.as_ref(), request, decode)
            .await
            .map_err(|cause| BrokerError::Provider {
                provider_id: provider.id.clone(),
                cause,
            })
    }

    pub async fn get_booking_by_id(
        &self,
        booking_id: &str,
        provider_id: &str,
        credentials: &CredentialBundle,
    ) -> Result<Booking> {
        let booking_id = required("bookingId", booking_id)?;
        self.forward(
            provider_id,
            Capability::Booking,
            credentials,
            |builder, provider, credential| builder.booking(provider, booking_id, credential),
            decode_one::<Booking>,
        )
        .await
    }

    pub async fn create_booking(
        &self,
        provider_id: &str,
        booking: &Booking,
        credentials: &CredentialBundle,
    ) -> Result<Booking> {
        self.forward(
            provider_id,
            Capability::Booking,
            credentials,
            |builder, provider, credential| builder.create_booking(provider, booking, credential),
            decode_one::<Booking>,
        )
        .await
    }

    pub async fn modify_booking(
        &self,
        provider_id: &str,
        booking_id: &str,
        booking: &Booking,
        credentials: &CredentialBundle,
    ) -> Result<Booking> {
        let booking_id = required("bookingId", booking_id)?;
        self.forward(
            provider_id,
            Capability::Booking,
            credentials,
            |builder, provider, credential| {
                builder.modify_booking(provider, booking_id, booking, credential)
            },
            decode_one::<Booking>,
        )
        .await
    }

    /// Performs a state transition such as `CANCEL`. Providers may answer
    /// with the updated booking or with an empty body.
    pub async fn perform_action(
        &self,
        provider_id: &str,
        booking_id: &str,
        action: &str,
        secret: Option<&str>,
        credentials: &CredentialBundle,
    ) -> Result<Option<Booking>> {
        let booking_id = required("bookingId", booking_id)?;
        let action = required("action", action)?;
        self.forward(
            provider_id,
            Capability::Booking,
            credentials,
            |builder, provider, credential| {
                builder.action(provider, booking_id, action, secret, credential)
            },
            decode_optional::<Booking>,
        )
        .await
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ValidationError::Blank(field))
    } else {
        Ok(value)
    }
}
