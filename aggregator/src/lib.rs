//! Fan-out and single-target forwarding of mobility requests to providers.
//!
//! A call moves through two phases. Requests are built sequentially on the
//! caller's task, with credentials routed per provider and adapters applied.
//! The built requests are then dispatched concurrently by the
//! [`executor::FanOutExecutor`] and their answers merged.

pub mod adapters;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod metrics_defs;
pub mod model;
pub mod query;
pub mod request;
pub mod service;
pub mod single;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use adapters::{AdapterChain, RequestAdapter, StaticHeadersAdapter, ViaHeaderAdapter};
pub use config::DispatchConfig;
pub use credentials::{Credential, CredentialBundle, CredentialRouter};
pub use engine::AggregationEngine;
pub use errors::{BrokerError, ProviderError, ValidationError};
pub use model::{AggregatedResult, Booking, Leg, ProviderFailure, TransportOption};
pub use query::{BookingsQuery, Coordinates, OptionsQuery};
pub use request::{ProviderRequest, ProviderRequestBuilder};
pub use service::MobilityBroker;
pub use single::SingleProviderRouter;
pub use transport::{HttpTransport, ProviderResponse, Transport};
