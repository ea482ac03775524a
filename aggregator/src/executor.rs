use crate::errors::ProviderError;
use crate::metrics_defs::{PROVIDER_CALL_DURATION, PROVIDER_CALL_FAILURE, PROVIDER_CALL_SUCCESS};
use crate::model::{
    AggregatedResult, ProviderCallOutcome, ProviderFailure, ProviderPayload, decode_list,
};
use crate::request::ProviderRequest;
use crate::transport::Transport;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

/// Runs already built provider requests concurrently and collects their
/// outcomes.
///
/// Concurrency is bounded by a semaphore shared by every aggregate call made
/// through the same executor. Each request carries its own transport timeout;
/// the optional deadline bounds a whole aggregate call.
#[derive(Clone)]
pub struct FanOutExecutor {
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
    deadline: Option<Duration>,
}

struct SpawnedTasks<T> {
    join_set: JoinSet<ProviderCallOutcome<T>>,
    task_providers: HashMap<Id, String>,
}

impl FanOutExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        max_concurrent_requests: usize,
        deadline: Option<Duration>,
    ) -> Self {
        FanOutExecutor {
            transport,
            permits: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            deadline,
        }
    }

    /// Dispatches every request and waits for all of them, or for the
    /// deadline. One provider failing never affects the others.
    ///
    /// Dropping the returned future aborts the calls still in flight.
    pub async fn dispatch<T: ProviderPayload>(
        &self,
        requests: Vec<ProviderRequest>,
    ) -> AggregatedResult<T> {
        let spawned = self.spawn_tasks(requests);
        self.collect_results(spawned).await
    }

    fn spawn_tasks<T: ProviderPayload>(&self, requests: Vec<ProviderRequest>) -> SpawnedTasks<T> {
        let mut join_set = JoinSet::new();
        let mut task_providers = HashMap::new();

        for request in requests {
            let provider_id = request.provider_id.clone();
            let transport = self.transport.clone();
            let permits = self.permits.clone();

            let abort_handle = join_set.spawn(async move {
                let provider_id = request.provider_id.clone();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        call_provider(transport.as_ref(), request, decode_list::<T>).await
                    }
                    Err(_) => Err(ProviderError::TaskFailed("dispatch pool closed".into())),
                };

                match result {
                    Ok(items) => ProviderCallOutcome::Success { provider_id, items },
                    Err(cause) => {
                        ProviderCallOutcome::Failure(ProviderFailure { provider_id, cause })
                    }
                }
            });

            task_providers.insert(abort_handle.id(), provider_id);
        }

        SpawnedTasks {
            join_set,
            task_providers,
        }
    }

    async fn collect_results<T: ProviderPayload>(
        &self,
        spawned: SpawnedTasks<T>,
    ) -> AggregatedResult<T> {
        let SpawnedTasks {
            mut join_set,
            mut task_providers,
        } = spawned;
        let mut results = AggregatedResult::default();

        let deadline = tokio::time::sleep(self.deadline.unwrap_or_default());
        tokio::pin!(deadline);

        while !join_set.is_empty() {
            tokio::select! {
                Some(join_result) = join_set.join_next_with_id() => {
                    match join_result {
                        Ok((id, outcome)) => {
                            task_providers.remove(&id);
                            results.push(outcome);
                        }
                        Err(e) => record_task_failure(&mut results, &mut task_providers, e),
                    }
                }
                _ = &mut deadline, if self.deadline.is_some() => {
                    tracing::warn!(
                        pending = join_set.len(),
                        "Aggregate deadline reached, aborting pending provider calls"
                    );
                    join_set.abort_all();
                    break;
                }
                else => break,
            }
        }

        drain_aborted(
            SpawnedTasks {
                join_set,
                task_providers,
            },
            &mut results,
            self.deadline.unwrap_or_default(),
        )
        .await;

        results
    }
}

/// Collects what is left in the set after `abort_all`. Tasks that finished
/// before the abort still count; aborted ones are reported as timed out.
async fn drain_aborted<T: ProviderPayload>(
    spawned: SpawnedTasks<T>,
    results: &mut AggregatedResult<T>,
    deadline: Duration,
) {
    let SpawnedTasks {
        mut join_set,
        mut task_providers,
    } = spawned;

    while let Some(join_result) = join_set.join_next_with_id().await {
        match join_result {
            Ok((id, outcome)) => {
                task_providers.remove(&id);
                results.push(outcome);
            }
            // Left in task_providers
            Err(e) if e.is_cancelled() => {}
            Err(e) => record_task_failure(results, &mut task_providers, e),
        }
    }

    for (_, provider_id) in task_providers.drain() {
        tracing::warn!(
            provider_id = %provider_id,
            deadline = ?deadline,
            "Provider call aborted at aggregate deadline"
        );
        counter!(PROVIDER_CALL_FAILURE, "provider" => provider_id.clone()).increment(1);
        results.failures.push(ProviderFailure {
            provider_id,
            cause: ProviderError::Timeout(deadline),
        });
    }
}

/// Records a task that panicked as a failure of its provider.
fn record_task_failure<T>(
    results: &mut AggregatedResult<T>,
    task_providers: &mut HashMap<Id, String>,
    error: JoinError,
) {
    let provider_id = task_providers.remove(&error.id()).unwrap_or_default();
    tracing::error!(provider_id = %provider_id, error = %error, "Provider task failed");
    counter!(PROVIDER_CALL_FAILURE, "provider" => provider_id.clone()).increment(1);
    results.failures.push(ProviderFailure {
        provider_id,
        cause: ProviderError::TaskFailed(error.to_string()),
    });
}

/// Executes one provider call, decodes its body, and records the call's
/// duration and outcome. A body that fails to decode counts as a failed call.
pub(crate) async fn call_provider<R>(
    transport: &dyn Transport,
    request: ProviderRequest,
    decode: impl FnOnce(&str, &[u8]) -> Result<R, ProviderError>,
) -> Result<R, ProviderError> {
    let provider_id = request.provider_id.clone();
    let started = Instant::now();

    let result = transport
        .execute(request)
        .await
        .and_then(|response| decode(provider_id.as_str(), &response.body[..]));

    histogram!(PROVIDER_CALL_DURATION, "provider" => provider_id.clone())
        .record(started.elapsed().as_secs_f64());
    match &result {
        Ok(_) => {
            counter!(PROVIDER_CALL_SUCCESS, "provider" => provider_id).increment(1);
        }
        Err(e) => {
            counter!(PROVIDER_CALL_FAILURE, "provider" => provider_id.clone()).increment(1);
            tracing::warn!(provider_id = %provider_id, error = %e, "Provider call failed");
        }
    }

    result
}
