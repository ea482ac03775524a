use crate::client::{ProviderSource, RegistryError};
use crate::metrics_defs::{PROVIDERS, REFRESH_DURATION, REFRESH_FAILURE, REFRESH_SUCCESS};
use crate::types::RegistrySnapshot;
use arc_swap::ArcSwap;
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("no registry snapshot available yet")]
    NotReady,

    #[error("registry refresh failed: {0}")]
    Refresh(#[from] RegistryError),

    #[error("the refresh worker has stopped")]
    Stopped,
}

/// When the background worker refreshes the snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefreshSchedule {
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        RefreshSchedule {
            interval: Duration::from_secs(24 * 60 * 60),
            initial_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
enum Command {
    // Trigger a refresh outside of the normal interval.
    // The worker replies with the outcome once the attempt finishes.
    Refresh(oneshot::Sender<Result<Arc<RegistrySnapshot>, CacheError>>),
    // Stop the worker loop
    Shutdown,
}

struct CacheInner {
    source: Arc<dyn ProviderSource>,
    snapshot: ArcSwap<RegistrySnapshot>,
    // Flips to true once any snapshot has been installed. Cold-start waiters
    // subscribe to it.
    ready: watch::Sender<bool>,
    update_lock: Semaphore,
}

/// Holds the latest successfully fetched provider list.
///
/// Readers get an `Arc` to an immutable snapshot and never wait on the
/// network. A refresh builds a complete new snapshot and swaps the pointer;
/// a failed refresh leaves the previous snapshot in place.
#[derive(Clone)]
pub struct ProviderCache {
    inner: Arc<CacheInner>,
}

impl ProviderCache {
    pub fn new(source: Arc<dyn ProviderSource>) -> Self {
        let (ready, _) = watch::channel(false);

        ProviderCache {
            inner: Arc::new(CacheInner {
                source,
                snapshot: ArcSwap::from_pointee(RegistrySnapshot::empty()),
                ready,
                update_lock: Semaphore::new(1),
            }),
        }
    }

    /// The latest snapshot. Empty until the first refresh succeeds.
    pub fn current(&self) -> Arc<RegistrySnapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Waits up to `timeout` for the first snapshot to be installed.
    pub async fn wait_for_first_snapshot(
        &self,
        timeout: Duration,
    ) -> Result<Arc<RegistrySnapshot>, CacheError> {
        let mut ready_rx = self.inner.ready.subscribe();
        let waited = tokio::time::timeout(timeout, async move {
            ready_rx.wait_for(|ready| *ready).await.is_ok()
        })
        .await;

        match waited {
            Ok(true) => Ok(self.current()),
            Ok(false) => Err(CacheError::Stopped),
            Err(_) => Err(CacheError::NotReady),
        }
    }

    /// Fetches the provider list and installs it as the new snapshot.
    ///
    /// Only one refresh runs at a time; concurrent callers queue behind it.
    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>, CacheError> {
        // Hold permit for the duration of this function
        let _permit = self
            .inner
            .update_lock
            .acquire()
            .await
            .map_err(|_| CacheError::Stopped)?;

        let started = Instant::now();

        let records = match self.inner.source.fetch_providers().await {
            Ok(records) => records,
            Err(e) => {
                counter!(REFRESH_FAILURE).increment(1);
                tracing::error!(
                    error = %e,
                    current_providers = self.current().len(),
                    "Registry refresh failed, keeping previous snapshot"
                );
                return Err(e.into());
            }
        };

        let snapshot = Arc::new(RegistrySnapshot::from_records(records));
        self.inner.snapshot.store(snapshot.clone());
        self.inner.ready.send_replace(true);

        counter!(REFRESH_SUCCESS).increment(1);
        gauge!(PROVIDERS).set(snapshot.len() as f64);
        histogram!(REFRESH_DURATION).record(started.elapsed().as_secs_f64());
        tracing::info!(providers = snapshot.len(), "Installed registry snapshot");

        Ok(snapshot)
    }

    /// Spawns the refresh worker. It loads the registry right away, then
    /// refreshes after `schedule.initial_delay` (one `schedule.interval` when
    /// the delay is zero) and every `schedule.interval` from there.
    pub fn start(&self, schedule: RefreshSchedule) -> RefreshHandle {
        // Channel to send commands to the worker task.
        let (tx, rx) = mpsc::channel::<Command>(16);

        let cache = self.clone();
        let handle = tokio::spawn(async move {
            cache.run_refresh_worker(schedule, rx).await;
        });

        RefreshHandle { tx, handle }
    }

    async fn run_refresh_worker(&self, schedule: RefreshSchedule, mut rx: mpsc::Receiver<Command>) {
        // Startup load; failures are logged in refresh()
        let _ = self.refresh().await;

        let first_tick = if schedule.initial_delay.is_zero() {
            schedule.interval
        } else {
            schedule.initial_delay
        };
        let mut ticker = tokio::time::interval_at(Instant::now() + first_tick, schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged in refresh() and the previous snapshot stays
                    let _ = self.refresh().await;
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh(reply)) => {
                        let _ = reply.send(self.refresh().await);
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::debug!("Registry refresh worker stopping");
                        break;
                    }
                },
            }
        }
    }
}

/// Control handle for the background refresh worker.
pub struct RefreshHandle {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl RefreshHandle {
    /// Asks the worker to refresh immediately and waits for the outcome.
    pub async fn refresh_now(&self) -> Result<Arc<RegistrySnapshot>, CacheError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Refresh(reply_tx))
            .await
            .map_err(|_| CacheError::Stopped)?;
        reply_rx.await.map_err(|_| CacheError::Stopped)?
    }

    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Registry refresh worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ScriptedSource, record};
    use reqwest::StatusCode;

    fn ids(snapshot: &RegistrySnapshot) -> Vec<String> {
        snapshot.iter().map(|p| p.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_empty_before_first_refresh() {
        let source = ScriptedSource::new(vec![]);
        let cache = ProviderCache::new(Arc::new(source));

        assert!(!cache.is_ready());
        assert!(cache.current().is_empty());
        assert!(cache.current().fetched_at().is_none());
    }

    #[tokio::test]
    async fn test_refresh_installs_sanitized_snapshot() {
        let source = ScriptedSource::new(vec![Ok(vec![
            record("a", &["OPTIONS"]),
            record("b", &[]),
        ])]);
        let cache = ProviderCache::new(Arc::new(source));

        let snapshot = cache.refresh().await.unwrap();
        assert_eq!(ids(&snapshot), vec!["a", "b"]);
        assert!(cache.is_ready());
        assert!(Arc::ptr_eq(&snapshot, &cache.current()));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(vec![record("a", &["OPTIONS"])]),
            Err(RegistryError::Status(StatusCode::BAD_GATEWAY)),
        ]);
        let cache = ProviderCache::new(Arc::new(source));

        let first = cache.refresh().await.unwrap();
        let result = cache.refresh().await;
        assert!(matches!(result, Err(CacheError::Refresh(_))));

        // The old snapshot is still served, unchanged
        assert!(Arc::ptr_eq(&first, &cache.current()));
        assert_eq!(ids(&cache.current()), vec!["a"]);
        assert!(cache.is_ready());
    }

    #[tokio::test]
    async fn test_failed_first_refresh_serves_empty() {
        let source = ScriptedSource::new(vec![Err(RegistryError::RetriesExceeded(3))]);
        let cache = ProviderCache::new(Arc::new(source));

        assert!(cache.refresh().await.is_err());
        assert!(cache.current().is_empty());
        assert!(!cache.is_ready());
    }

    #[tokio::test]
    async fn test_readers_keep_their_snapshot_across_swap() {
        let source = ScriptedSource::new(vec![
            Ok(vec![record("a", &["OPTIONS"])]),
            Ok(vec![record("b", &["OPTIONS"]), record("c", &["OPTIONS"])]),
        ]);
        let cache = ProviderCache::new(Arc::new(source));

        cache.refresh().await.unwrap();
        let held = cache.current();
        cache.refresh().await.unwrap();

        assert_eq!(ids(&held), vec!["a"]);
        assert_eq!(ids(&cache.current()), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_wait_for_first_snapshot_times_out() {
        let cache = ProviderCache::new(Arc::new(ScriptedSource::new(vec![])));

        let result = cache
            .wait_for_first_snapshot(Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(CacheError::NotReady)));
    }

    #[tokio::test]
    async fn test_worker_loads_and_serves_waiters() {
        let source = ScriptedSource::new(vec![Ok(vec![record("a", &["OPTIONS"])])]);
        let cache = ProviderCache::new(Arc::new(source));

        let handle = cache.start(RefreshSchedule {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_millis(20),
        });

        let snapshot = cache
            .wait_for_first_snapshot(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["a"]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_loads_before_initial_delay() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![record("a", &["OPTIONS"])]),
            Ok(vec![record("b", &["OPTIONS"])]),
        ]));
        let cache = ProviderCache::new(source.clone());

        let handle = cache.start(RefreshSchedule {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(2),
        });

        let snapshot = cache
            .wait_for_first_snapshot(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["a"]);
        // The scheduled refresh is still waiting for the initial delay
        assert_eq!(source.calls(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_silent_registry_does_not_wedge_refresh() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let client = crate::client::ServiceRegistryClient::new(
            format!("http://{addr}").parse().unwrap(),
            0,
        )
        .with_request_timeout(Duration::from_millis(200));
        let cache = ProviderCache::new(Arc::new(client));

        let first = tokio::time::timeout(Duration::from_secs(5), cache.refresh()).await;
        assert!(matches!(first, Ok(Err(CacheError::Refresh(_)))));

        let second = tokio::time::timeout(Duration::from_secs(5), cache.refresh()).await;
        assert!(matches!(second, Ok(Err(CacheError::Refresh(_)))));
        assert!(cache.current().is_empty());
    }

    #[tokio::test]
    async fn test_worker_refresh_now() {
        let source = ScriptedSource::new(vec![
            Ok(vec![record("a", &["OPTIONS"])]),
            Ok(vec![record("b", &["OPTIONS"])]),
            Err(RegistryError::RetriesExceeded(0)),
        ]);
        let cache = ProviderCache::new(Arc::new(source));

        let handle = cache.start(RefreshSchedule {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::ZERO,
        });
        cache
            .wait_for_first_snapshot(Duration::from_secs(5))
            .await
            .unwrap();

        let refreshed = handle.refresh_now().await.unwrap();
        assert_eq!(ids(&refreshed), vec!["b"]);

        assert!(matches!(
            handle.refresh_now().await,
            Err(CacheError::Refresh(_))
        ));
        assert_eq!(ids(&cache.current()), vec!["b"]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_periodic_refresh() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![record("a", &["OPTIONS"])]),
            Ok(vec![record("b", &["OPTIONS"])]),
        ]));
        let cache = ProviderCache::new(source.clone());

        let handle = cache.start(RefreshSchedule {
            interval: Duration::from_millis(30),
            initial_delay: Duration::ZERO,
        });

        let mut attempts = 0;
        while ids(&cache.current()) != vec!["b"] && attempts < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert_eq!(ids(&cache.current()), vec!["b"]);
        assert!(source.calls() >= 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_now_after_shutdown() {
        let cache = ProviderCache::new(Arc::new(ScriptedSource::new(vec![])));
        let handle = cache.start(RefreshSchedule::default());
        let (tx, _rx) = oneshot::channel();
        handle.tx.send(Command::Shutdown).await.unwrap();
        // The worker drops its receiver once it stops
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.tx.send(Command::Refresh(tx)).await.is_err());
        assert!(matches!(
            handle.refresh_now().await,
            Err(CacheError::Stopped)
        ));
    }
}
