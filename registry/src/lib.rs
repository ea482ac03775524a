//! Provider discovery for the mobility broker.
//!
//! The [`client::ServiceRegistryClient`] talks to the central directory service,
//! and the [`cache::ProviderCache`] keeps the latest successfully fetched
//! [`types::RegistrySnapshot`] available to readers without blocking on the network.

pub mod cache;
pub mod client;
pub mod config;
pub mod metrics_defs;
pub mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use cache::{CacheError, ProviderCache, RefreshHandle, RefreshSchedule};
pub use client::{ProviderSource, RegistryError, RegistryFilter, ServiceRegistryClient};
pub use types::{Capability, ProviderDescriptor, RegistryRecord, RegistrySnapshot};
