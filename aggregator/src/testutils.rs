use crate::adapters::RequestAdapter;
use crate::errors::ProviderError;
use crate::request::ProviderRequest;
use crate::transport::{ProviderResponse, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use registry::testutils::ScriptedSource;
use registry::{ProviderCache, RegistryRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of build and dispatch events across adapters and transports.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A cache holding exactly `records`.
pub async fn seeded_cache(records: Vec<RegistryRecord>) -> ProviderCache {
    let cache = ProviderCache::new(Arc::new(ScriptedSource::new(vec![Ok(records)])));
    cache.refresh().await.unwrap();
    cache
}

#[derive(Clone, Debug)]
pub enum MockReply {
    Body(&'static str),
    Status(StatusCode),
    /// Never answers within any reasonable test timeout.
    Hang,
    Panic,
}

/// Transport answering per provider id from a fixed table.
#[derive(Default)]
pub struct MockTransport {
    replies: HashMap<String, (Duration, MockReply)>,
    log: EventLog,
    requests: Mutex<Vec<ProviderRequest>>,
    completed: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(log: EventLog) -> Self {
        MockTransport {
            log,
            ..Self::default()
        }
    }

    pub fn reply(self, provider_id: &str, reply: MockReply) -> Self {
        self.reply_after(provider_id, Duration::ZERO, reply)
    }

    pub fn reply_after(mut self, provider_id: &str, delay: Duration, reply: MockReply) -> Self {
        self.replies.insert(provider_id.to_string(), (delay, reply));
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Provider ids in dispatch order.
    pub fn contacted(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.provider_id)
            .collect()
    }

    /// Provider ids whose call ran to the end.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let provider_id = request.provider_id.clone();
        self.log.push(format!("dispatch:{provider_id}"));
        self.requests.lock().unwrap().push(request);

        let Some((delay, reply)) = self.replies.get(&provider_id).cloned() else {
            return Err(ProviderError::Transport(format!("no route to {provider_id}")));
        };

        match reply {
            MockReply::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
            _ => tokio::time::sleep(delay).await,
        }
        self.completed.lock().unwrap().push(provider_id);

        match reply {
            MockReply::Body(body) => Ok(ProviderResponse {
                status: StatusCode::OK,
                body: Bytes::from_static(body.as_bytes()),
            }),
            MockReply::Status(status) => Err(ProviderError::Status(status)),
            MockReply::Hang => Err(ProviderError::Timeout(Duration::from_secs(3600))),
            MockReply::Panic => panic!("provider transport blew up"),
        }
    }
}

/// Adapter that logs every request it sees as `build:{provider}`.
pub struct RecordingAdapter(pub EventLog);

impl RequestAdapter for RecordingAdapter {
    fn adapt(&self, request: &mut ProviderRequest) {
        self.0.push(format!("build:{}", request.provider_id));
    }
}
