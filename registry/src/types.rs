use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use url::Url;

pub type ProviderId = String;

/// An API surface a provider declares in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Options,
    Booking,
    Places,
    Credentials,
    Assets,
}

impl Capability {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Capability::Options => "OPTIONS",
            Capability::Booking => "BOOKING",
            Capability::Places => "PLACES",
            Capability::Credentials => "CREDENTIALS",
            Capability::Assets => "ASSETS",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPTIONS" => Ok(Capability::Options),
            "BOOKING" | "BOOKINGS" => Ok(Capability::Booking),
            "PLACES" => Ok(Capability::Places),
            "CREDENTIALS" => Ok(Capability::Credentials),
            "ASSETS" => Ok(Capability::Assets),
            _ => Err(UnknownCapability(s.to_string())),
        }
    }
}

/// A provider entry exactly as the registry returns it. Every field may be
/// missing or null; [`ProviderDescriptor::from_record`] decides what is admitted.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub service_url: Option<String>,
    pub apis: Option<Vec<String>>,
    pub modes: Option<Vec<String>>,
    pub mobility_types: Option<Vec<String>>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum InvalidRecord {
    #[error("provider record has no id")]
    MissingId,
    #[error("provider {0} has no service url")]
    MissingUrl(String),
    #[error("provider {id} has an invalid service url: {reason}")]
    InvalidUrl { id: String, reason: String },
}

/// Immutable view of one provider as admitted into a snapshot.
///
/// Serializes in the registry's own wire shape so it can be posted back for
/// self-registration.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "serviceUrl")]
    pub base_url: Url,
    #[serde(rename = "apis")]
    pub capabilities: BTreeSet<Capability>,
    pub modes: BTreeSet<String>,
    pub mobility_types: BTreeSet<String>,
}

impl ProviderDescriptor {
    /// Sanitizes a raw registry record. Null capability, mode and mobility type
    /// lists become empty sets; a missing id or service url rejects the record.
    pub fn from_record(record: RegistryRecord) -> Result<Self, InvalidRecord> {
        let id = record
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(InvalidRecord::MissingId)?;

        let raw_url = record
            .service_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| InvalidRecord::MissingUrl(id.clone()))?;

        let base_url = Url::parse(raw_url.trim()).map_err(|e| InvalidRecord::InvalidUrl {
            id: id.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(InvalidRecord::InvalidUrl {
                id,
                reason: format!("unsupported scheme {}", base_url.scheme()),
            });
        }

        let capabilities = record
            .apis
            .unwrap_or_default()
            .iter()
            .filter_map(|api| match api.parse::<Capability>() {
                Ok(capability) => Some(capability),
                Err(e) => {
                    tracing::debug!(provider_id = %id, error = %e, "Ignoring capability");
                    None
                }
            })
            .collect();

        Ok(ProviderDescriptor {
            id,
            name: record.name,
            base_url,
            capabilities,
            modes: normalize_tags(record.modes),
            mobility_types: normalize_tags(record.mobility_types),
        })
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// True when `filter` is empty or shares at least one mode with this provider.
    pub fn matches_modes(&self, filter: &BTreeSet<String>) -> bool {
        filter.is_empty() || !self.modes.is_disjoint(filter)
    }

    /// True when `filter` is empty or shares at least one mobility type with this provider.
    pub fn matches_mobility_types(&self, filter: &BTreeSet<String>) -> bool {
        filter.is_empty() || !self.mobility_types.is_disjoint(filter)
    }
}

/// Tags are compared case-insensitively, so they are stored upper-cased.
pub fn normalize_tags<I, S>(tags: Option<I>) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .flatten()
        .map(|tag| tag.as_ref().trim().to_ascii_uppercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// The provider set as of one successful registry fetch, in registry order.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    providers: IndexMap<ProviderId, Arc<ProviderDescriptor>>,
    fetched_at: Option<SystemTime>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from raw registry records. Records that fail
    /// sanitization and repeated ids are dropped with a warning; the first
    /// occurrence of an id wins.
    pub fn from_records(records: Vec<RegistryRecord>) -> Self {
        let mut providers = IndexMap::with_capacity(records.len());

        for record in records {
            match ProviderDescriptor::from_record(record) {
                Ok(descriptor) => {
                    if providers.contains_key(&descriptor.id) {
                        tracing::warn!(
                            provider_id = %descriptor.id,
                            "Duplicate provider id in registry, keeping first"
                        );
                        continue;
                    }
                    providers.insert(descriptor.id.clone(), Arc::new(descriptor));
                }
                Err(e) => tracing::warn!(error = %e, "Dropping invalid registry record"),
            }
        }

        RegistrySnapshot {
            providers,
            fetched_at: Some(SystemTime::now()),
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<&Arc<ProviderDescriptor>> {
        self.providers.get(provider_id)
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    /// Providers in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderDescriptor>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// When the records were fetched. `None` for the startup placeholder.
    pub fn fetched_at(&self) -> Option<SystemTime> {
        self.fetched_at
    }
}
