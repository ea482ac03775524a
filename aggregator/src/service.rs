use crate::adapters::{AdapterChain, ViaHeaderAdapter};
use crate::config::DispatchConfig;
use crate::credentials::CredentialBundle;
use crate::engine::AggregationEngine;
use crate::errors::Result;
use crate::executor::FanOutExecutor;
use crate::model::{AggregatedResult, Booking, TransportOption};
use crate::query::{BookingsQuery, OptionsQuery};
use crate::single::SingleProviderRouter;
use crate::transport::{HttpTransport, Transport};
use registry::{ProviderCache, RegistrySnapshot};
use std::sync::Arc;

/// The operations the broker offers to an HTTP or CLI front end.
///
/// Wires one [`AggregationEngine`] and one [`SingleProviderRouter`] over the
/// same cache, transport and adapters.
#[derive(Clone)]
pub struct MobilityBroker {
    cache: ProviderCache,
    engine: AggregationEngine,
    router: SingleProviderRouter,
}

impl MobilityBroker {
    pub fn new(
        cache: ProviderCache,
        transport: Arc<dyn Transport>,
        config: &DispatchConfig,
        adapters: AdapterChain,
    ) -> Self {
        let executor = FanOutExecutor::new(
            transport.clone(),
            config.max_concurrent_requests,
            config.aggregate_timeout(),
        );

        MobilityBroker {
            engine: AggregationEngine::new(cache.clone(), executor, adapters.clone()),
            router: SingleProviderRouter::new(cache.clone(), transport, adapters),
            cache,
        }
    }

    /// HTTP transport with the configured per-call timeout, plus the `Via`
    /// adapter followed by `extra_adapters`.
    pub fn from_config(
        cache: ProviderCache,
        config: &DispatchConfig,
        extra_adapters: AdapterChain,
    ) -> Self {
        let transport = Arc::new(HttpTransport::new(config.provider_timeout()));
        let mut adapters = AdapterChain::new().with(ViaHeaderAdapter);
        adapters.extend(extra_adapters);

        Self::new(cache, transport, config, adapters)
    }

    pub fn providers(&self) -> Arc<RegistrySnapshot> {
        self.cache.current()
    }

    pub async fn get_options(
        &self,
        query: &OptionsQuery,
        credentials: &CredentialBundle,
    ) -> Result<AggregatedResult<TransportOption>> {
        self.engine.get_options(query, credentials).await
    }

    pub async fn get_bookings(
        &self,
        query: &BookingsQuery,
        credentials: &CredentialBundle,
    ) -> Result<AggregatedResult<Booking>> {
        self.engine.get_bookings(query, credentials).await
    }

    pub async fn get_booking_by_id(
        &self,
        booking_id: &str,
        provider_id: &str,
        credentials: &CredentialBundle,
    ) -> Result<Booking> {
        self.router
            .get_booking_by_id(booking_id, provider_id, credentials)
            .await
    }

    pub async fn create_booking(
        &self,
        provider_id: &str,
        booking: &Booking,
        credentials: &CredentialBundle,
    ) -> Result<Booking> {
        self.router
            .create_booking(provider_id, booking, credentials)
            .await
    }

    pub async fn modify_booking(
        &self,
        provider_id: &str,
        booking_id: &str,
        booking: &Booking,
        credentials: &CredentialBundle,
    ) -> Result<Booking> {
        self.router
            .modify_booking(provider_id, booking_id, booking, credentials)
            .await
    }

    pub async fn perform_action(
        &self,
        provider_id: &str,
        booking_id: &str,
        action: &str,
        secret: Option<&str>,
        credentials: &CredentialBundle,
    ) -> Result<Option<Booking>> {
        self.router
            .perform_action(provider_id, booking_id, action, secret, credentials)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{BrokerError, ProviderError};
    use crate::query::Coordinates;
    use registry::ServiceRegistryClient;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_registry(registry: &MockServer, providers: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("active", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(providers))
            .mount(registry)
            .await;
    }

    async fn loaded_cache(registry: &MockServer) -> ProviderCache {
        let client = ServiceRegistryClient::new(Url::parse(&registry.uri()).unwrap(), 0);
        let cache = ProviderCache::new(Arc::new(client));
        cache.refresh().await.unwrap();
        cache
    }

    fn dispatch_config() -> DispatchConfig {
        DispatchConfig {
            provider_timeout_secs: 1,
            ..DispatchConfig::default()
        }
    }

    fn options_query() -> OptionsQuery {
        OptionsQuery::new(Coordinates::new(52.37, 4.89).unwrap())
    }

    #[tokio::test]
    async fn test_options_with_one_provider_timing_out() {
        let registry = MockServer::start().await;
        let provider_a = MockServer::start().await;
        let provider_b = MockServer::start().await;

        mount_registry(
            &registry,
            json!([
                {"id": "a", "serviceUrl": provider_a.uri(), "apis": ["OPTIONS"]},
                {"id": "b", "serviceUrl": provider_b.uri(), "apis": ["OPTIONS"]},
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/options"))
            .and(query_param("from", "52.37,4.89"))
            .and(header("via", "1.1 mobility-broker"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"leg": {"serviceId": "a"}}])),
            )
            .expect(1)
            .mount(&provider_a)
            .await;
        Mock::given(method("GET"))
            .and(path("/options"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&provider_b)
            .await;

        let broker = MobilityBroker::from_config(
            loaded_cache(&registry).await,
            &dispatch_config(),
            AdapterChain::new(),
        );
        let result = broker
            .get_options(&options_query(), &CredentialBundle::empty())
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&result.items).unwrap(),
            json!([{"leg": {"serviceId": "a"}}])
        );
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].provider_id, "b");
        assert!(matches!(result.failures[0].cause, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_empty_registry_gives_empty_options() {
        let registry = MockServer::start().await;
        mount_registry(&registry, json!([])).await;

        let broker = MobilityBroker::from_config(
            loaded_cache(&registry).await,
            &dispatch_config(),
            AdapterChain::new(),
        );
        let result = broker
            .get_options(&options_query(), &CredentialBundle::empty())
            .await
            .unwrap();

        assert!(result.items.is_empty());
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_only_listed_provider_contacted() {
        let registry = MockServer::start().await;
        let providers = [
            MockServer::start().await,
            MockServer::start().await,
            MockServer::start().await,
        ];
        mount_registry(
            &registry,
            json!([
                {"id": "a", "serviceUrl": providers[0].uri(), "apis": ["OPTIONS"]},
                {"id": "b", "serviceUrl": providers[1].uri(), "apis": ["OPTIONS"]},
                {"id": "c", "serviceUrl": providers[2].uri(), "apis": ["OPTIONS"]},
            ]),
        )
        .await;
        for (server, expected_calls) in providers.iter().zip([0u64, 1, 0]) {
            Mock::given(method("GET"))
                .and(path("/options"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
                .expect(expected_calls)
                .mount(server)
                .await;
        }

        let broker = MobilityBroker::from_config(
            loaded_cache(&registry).await,
            &dispatch_config(),
            AdapterChain::new(),
        );
        broker
            .get_options(
                &options_query().with_provider_ids(["b"]),
                &CredentialBundle::empty(),
            )
            .await
            .unwrap();
        // Expectations are verified when the mock servers drop
    }

    #[tokio::test]
    async fn test_booking_lifecycle_routed_to_one_provider() {
        let registry = MockServer::start().await;
        let provider = MockServer::start().await;
        let bystander = MockServer::start().await;
        mount_registry(
            &registry,
            json!([
                {
                    "id": "svc-a",
                    "serviceUrl": format!("{}/tomp", provider.uri()),
                    "apis": ["BOOKING"]
                },
                {"id": "svc-b", "serviceUrl": bystander.uri(), "apis": ["BOOKING"]},
            ]),
        )
        .await;

        Mock::given(method("POST"))
            .and(path("/tomp/bookings"))
            .and(header("x-token", "CRED_A"))
            .and(body_json(json!({"state": "NEW"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "b1", "state": "PENDING"})),
            )
            .expect(1)
            .mount(&provider)
            .await;
        Mock::given(method("PUT"))
            .and(path("/tomp/bookings/b1"))
            .and(header_exists("x-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "b1", "state": "CONFIRMED"})),
            )
            .expect(1)
            .mount(&provider)
            .await;
        Mock::given(method("POST"))
            .and(path("/tomp/bookings/b1/action/CANCEL"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&provider)
            .await;
        Mock::given(method("GET"))
            .and(path("/tomp/bookings/b1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"id": "b1", "state": "CANCELLED", "serviceId": "svc-a"}),
            ))
            .expect(1)
            .mount(&provider)
            .await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&bystander)
            .await;

        let broker = MobilityBroker::from_config(
            loaded_cache(&registry).await,
            &dispatch_config(),
            AdapterChain::new(),
        );
        let credentials = CredentialBundle::parse(Some(r#"{"svc-a":"CRED_A","svc-b":"CRED_B"}"#));

        let new_booking = Booking {
            state: Some("NEW".into()),
            ..Booking::default()
        };
        let created = broker
            .create_booking("svc-a", &new_booking, &credentials)
            .await
            .unwrap();
        assert_eq!(created.id.as_deref(), Some("b1"));
        assert_eq!(created.service_id.as_deref(), Some("svc-a"));

        let modified = broker
            .modify_booking("svc-a", "b1", &created, &credentials)
            .await
            .unwrap();
        assert_eq!(modified.state.as_deref(), Some("CONFIRMED"));

        let cancelled = broker
            .perform_action("svc-a", "b1", "CANCEL", None, &credentials)
            .await
            .unwrap();
        assert_eq!(cancelled, None);

        let fetched = broker
            .get_booking_by_id("b1", "svc-a", &credentials)
            .await
            .unwrap();
        assert_eq!(fetched.state.as_deref(), Some("CANCELLED"));
    }

    #[tokio::test]
    async fn test_booking_for_unknown_provider() {
        let registry = MockServer::start().await;
        mount_registry(&registry, json!([])).await;

        let broker = MobilityBroker::from_config(
            loaded_cache(&registry).await,
            &dispatch_config(),
            AdapterChain::new(),
        );
        let result = broker
            .get_booking_by_id("xyz", "ghost", &CredentialBundle::empty())
            .await;

        assert!(matches!(result, Err(BrokerError::ProviderNotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_get_bookings_across_providers() {
        let registry = MockServer::start().await;
        let provider_a = MockServer::start().await;
        let provider_b = MockServer::start().await;
        mount_registry(
            &registry,
            json!([
                {"id": "a", "serviceUrl": provider_a.uri(), "apis": ["BOOKING"]},
                {"id": "b", "serviceUrl": provider_b.uri(), "apis": ["BOOKING"]},
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/bookings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a1"}])))
            .mount(&provider_a)
            .await;
        Mock::given(method("GET"))
            .and(path("/bookings"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&provider_b)
            .await;

        let broker = MobilityBroker::from_config(
            loaded_cache(&registry).await,
            &dispatch_config(),
            AdapterChain::new(),
        );
        let result = broker
            .get_bookings(&BookingsQuery::default(), &CredentialBundle::empty())
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].service_id.as_deref(), Some("a"));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(broker.providers().len(), 2);
    }
}
