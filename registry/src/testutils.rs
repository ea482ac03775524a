use crate::client::{ProviderSource, RegistryError};
use crate::types::RegistryRecord;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A registry record for `id` served from `http://{id}.example.com`.
pub fn record(id: &str, apis: &[&str]) -> RegistryRecord {
    record_at(id, &format!("http://{id}.example.com"), apis, &[])
}

pub fn record_at(id: &str, service_url: &str, apis: &[&str], modes: &[&str]) -> RegistryRecord {
    RegistryRecord {
        id: Some(id.to_string()),
        name: None,
        service_url: Some(service_url.to_string()),
        apis: Some(apis.iter().map(|s| s.to_string()).collect()),
        modes: Some(modes.iter().map(|s| s.to_string()).collect()),
        mobility_types: None,
    }
}

/// Provider source that replays a fixed script of fetch outcomes, then fails.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<RegistryRecord>, RegistryError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Vec<RegistryRecord>, RegistryError>>) -> Self {
        ScriptedSource {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSource for ScriptedSource {
    async fn fetch_providers(&self) -> Result<Vec<RegistryRecord>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.unwrap_or(Err(RegistryError::RetriesExceeded(0)))
    }
}
