// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared per-destination path pool.
//!
//! The pool caches the paths fetched for each destination ISD-AS and pushes new path sets to
//! every subscriber of that destination. It also forwards down notifications it receives from the
//! liveness registry to all of its subscribers.
//!
//! One pool is shared by all connections of a stack. It is passed to the connections explicitly.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::{Duration, SystemTime},
};

use futures::{FutureExt, future::BoxFuture};
use tokio::{select, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    address::IsdAsn,
    path::{
        Path, PathFingerprint, PathInterface,
        fetcher::{PathFetchError, PathFetcher},
        stats::PathDownReceiver,
    },
    types::Subscribers,
};

/// Receives the path sets and down notifications of a destination.
pub trait PoolSubscriber: Send + Sync {
    /// Called with the new path set whenever the paths to `destination` were refreshed.
    fn refresh(&self, destination: IsdAsn, paths: Vec<Arc<Path>>);

    /// Called for every down notification, regardless of the destination.
    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface);
}

/// Per-destination path pool.
pub trait PathPool: Send + Sync {
    /// Subscribes to the paths to `destination` and returns the current path set.
    ///
    /// Paths are fetched if none are cached yet.
    fn subscribe(
        &self,
        destination: IsdAsn,
        subscriber: Arc<dyn PoolSubscriber>,
    ) -> BoxFuture<'_, Result<Vec<Arc<Path>>, PathPoolError>>;

    /// Cancels a subscription made with [`PathPool::subscribe`].
    fn unsubscribe(&self, destination: IsdAsn, subscriber: &Arc<dyn PoolSubscriber>);

    /// Returns the cached paths to `destination` without fetching.
    fn cached_paths(&self, destination: IsdAsn) -> Vec<Arc<Path>>;
}

/// Path pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PathPoolError {
    /// Fetching the paths failed.
    #[error("failed to fetch paths to {destination}: {source}")]
    Fetch {
        /// The destination ISD-AS.
        destination: IsdAsn,
        /// The underlying error.
        #[source]
        source: PathFetchError,
    },
}

/// Configuration for the [`DefaultPathPool`].
#[derive(Debug, Clone, Copy)]
pub struct PathPoolConfig {
    /// Interval between background refreshes of every subscribed destination.
    pub refresh_interval: Duration,
    /// Minimum duration between two fetches for the same destination.
    pub min_refresh_delay: Duration,
}

impl Default for PathPoolConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5 * 60),
            min_refresh_delay: Duration::from_secs(10),
        }
    }
}

impl PathPoolConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.refresh_interval.is_zero() {
            return Err("refresh_interval must be positive");
        }
        if self.min_refresh_delay > self.refresh_interval {
            return Err("min_refresh_delay must be smaller than refresh_interval");
        }
        Ok(())
    }
}

#[derive(Default)]
struct PoolEntry {
    paths: Vec<Arc<Path>>,
    fetched_at: Option<Instant>,
    subscribers: Subscribers<dyn PoolSubscriber>,
    /// Held while the first fetch for the destination is in flight.
    first_fetch: Arc<tokio::sync::Mutex<()>>,
}

/// Default [`PathPool`] backed by a [`PathFetcher`].
pub struct DefaultPathPool<F: PathFetcher> {
    local: IsdAsn,
    config: PathPoolConfig,
    fetcher: F,
    entries: Mutex<HashMap<IsdAsn, PoolEntry>>,
}

impl<F: PathFetcher> DefaultPathPool<F> {
    /// Creates a new pool fetching paths from `local`.
    pub fn new(local: IsdAsn, config: PathPoolConfig, fetcher: F) -> Result<Self, &'static str> {
        config.validate()?;
        Ok(Self {
            local,
            config,
            fetcher,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Refetches the paths to `destination` and pushes them to its subscribers.
    ///
    /// Does nothing if the paths were fetched less than `min_refresh_delay` ago.
    pub async fn refresh(&self, destination: IsdAsn) -> Result<(), PathPoolError> {
        let recently_fetched = {
            let entries = self.entries.lock().expect("lock poisoned");
            entries
                .get(&destination)
                .and_then(|e| e.fetched_at)
                .is_some_and(|at| at.elapsed() < self.config.min_refresh_delay)
        };
        if recently_fetched {
            tracing::trace!(%destination, "Skipping refresh, paths are fresh");
            return Ok(());
        }

        let paths = self.fetch(destination).await?;
        let subscribers = self.store(destination, paths.clone());
        tracing::debug!(%destination, count = paths.len(), "Refreshed paths");
        subscribers.for_each(|s| s.refresh(destination, paths.clone()));
        Ok(())
    }

    /// Spawns a task that refreshes every subscribed destination each `refresh_interval`.
    ///
    /// Destinations without subscribers are dropped from the pool. Dropping the returned handle
    /// stops the task.
    pub fn spawn_refresher(self: &Arc<Self>) -> PoolRefresherTask {
        let cancel_token = CancellationToken::new();
        let pool = Arc::downgrade(self);
        let interval = self.config.refresh_interval;

        let task = {
            let cancel_token = cancel_token.clone();
            async move {
                let exit_reason = Self::refresh_loop(pool, interval, cancel_token).await;
                tracing::info!(exit_reason, "Path pool refresher exiting");
            }
        };

        PoolRefresherTask {
            _task: tokio::spawn(task.in_current_span()),
            cancel_token,
        }
    }

    async fn refresh_loop(
        pool: Weak<Self>,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> &'static str {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            select! {
                biased;
                _ = cancel_token.cancelled() => return "cancelled",
                _ = ticker.tick() => {
                    let Some(pool) = pool.upgrade() else {
                        return "pool dropped";
                    };
                    for destination in pool.subscribed_destinations() {
                        if let Err(e) = pool.refresh(destination).await {
                            tracing::warn!(%destination, error = %e, "Failed to refresh paths");
                        }
                    }
                }
            }
        }
    }

    /// Returns the destinations with live subscribers, removing the others.
    fn subscribed_destinations(&self) -> Vec<IsdAsn> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        entries.retain(|destination, entry| {
            let keep = !entry.subscribers.is_empty();
            if !keep {
                tracing::debug!(%destination, "Dropping destination without subscribers");
            }
            keep
        });
        entries.keys().copied().collect()
    }

    fn fetched_paths(&self, destination: IsdAsn) -> Option<Vec<Arc<Path>>> {
        let entries = self.entries.lock().expect("lock poisoned");
        entries
            .get(&destination)
            .filter(|e| e.fetched_at.is_some())
            .map(|e| e.paths.clone())
    }

    async fn fetch(&self, destination: IsdAsn) -> Result<Vec<Arc<Path>>, PathPoolError> {
        let paths = match self.fetcher.fetch_paths(self.local, destination).await {
            Ok(paths) => paths,
            // An empty set is a valid state, new paths may appear on a later refresh.
            Err(PathFetchError::NoPathsFound) => Vec::new(),
            Err(source) => {
                return Err(PathPoolError::Fetch {
                    destination,
                    source,
                });
            }
        };

        let now = SystemTime::now();
        Ok(paths
            .into_iter()
            .filter(|p| p.expiry.is_none_or(|expiry| expiry > now))
            .map(Arc::new)
            .collect())
    }

    fn store(&self, destination: IsdAsn, paths: Vec<Arc<Path>>) -> Subscribers<dyn PoolSubscriber> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        let entry = entries.entry(destination).or_default();
        entry.paths = paths;
        entry.fetched_at = Some(Instant::now());
        entry.subscribers.clone()
    }
}

impl<F: PathFetcher> PathPool for DefaultPathPool<F> {
    fn subscribe(
        &self,
        destination: IsdAsn,
        subscriber: Arc<dyn PoolSubscriber>,
    ) -> BoxFuture<'_, Result<Vec<Arc<Path>>, PathPoolError>> {
        async move {
            let first_fetch = {
                let mut entries = self.entries.lock().expect("lock poisoned");
                let entry = entries.entry(destination).or_default();
                entry.subscribers.register(subscriber);
                if entry.fetched_at.is_some() {
                    return Ok(entry.paths.clone());
                }
                entry.first_fetch.clone()
            };

            // Concurrent first subscribers share a single fetch.
            let _guard = first_fetch.lock().await;
            if let Some(paths) = self.fetched_paths(destination) {
                return Ok(paths);
            }

            tracing::debug!(%destination, "Fetching paths for new destination");
            let paths = self.fetch(destination).await?;
            self.store(destination, paths.clone());
            Ok(paths)
        }
        .boxed()
    }

    fn unsubscribe(&self, destination: IsdAsn, subscriber: &Arc<dyn PoolSubscriber>) {
        let entries = self.entries.lock().expect("lock poisoned");
        if let Some(entry) = entries.get(&destination) {
            entry.subscribers.unregister(subscriber);
        }
    }

    fn cached_paths(&self, destination: IsdAsn) -> Vec<Arc<Path>> {
        let entries = self.entries.lock().expect("lock poisoned");
        entries
            .get(&destination)
            .map(|e| e.paths.clone())
            .unwrap_or_default()
    }
}

impl<F: PathFetcher> PathDownReceiver for DefaultPathPool<F> {
    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
        let subscribers: Vec<_> = {
            let entries = self.entries.lock().expect("lock poisoned");
            entries.values().map(|e| e.subscribers.clone()).collect()
        };
        for subscribers in subscribers {
            subscribers.for_each(|s| s.path_down(fingerprint, interface));
        }
    }
}

/// Handle of the background refresh task. Dropping it stops the task.
pub struct PoolRefresherTask {
    _task: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl Drop for PoolRefresherTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::path::test_builder::{dummy_path, ia};

    struct FakeFetcher {
        calls: AtomicUsize,
        paths: Mutex<Result<Vec<Path>, ()>>,
        delay: Mutex<Duration>,
    }

    impl FakeFetcher {
        fn new(paths: Vec<Path>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                paths: Mutex::new(Ok(paths)),
                delay: Mutex::new(Duration::ZERO),
            }
        }
    }

    impl PathFetcher for Arc<FakeFetcher> {
        async fn fetch_paths(
            &self,
            _src: IsdAsn,
            _dst: IsdAsn,
        ) -> Result<Vec<Path>, PathFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match &*self.paths.lock().unwrap() {
                Ok(paths) => Ok(paths.clone()),
                Err(()) => Err(PathFetchError::Unavailable("down".into())),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        refreshes: Mutex<Vec<usize>>,
        downs: AtomicUsize,
    }

    impl PoolSubscriber for Recorder {
        fn refresh(&self, _destination: IsdAsn, paths: Vec<Arc<Path>>) {
            self.refreshes.lock().unwrap().push(paths.len());
        }

        fn path_down(&self, _fingerprint: PathFingerprint, _interface: PathInterface) {
            self.downs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> PathPoolConfig {
        PathPoolConfig {
            refresh_interval: Duration::from_secs(60),
            min_refresh_delay: Duration::from_secs(10),
        }
    }

    fn setup(paths: Vec<Path>) -> (Arc<FakeFetcher>, Arc<DefaultPathPool<Arc<FakeFetcher>>>) {
        let fetcher = Arc::new(FakeFetcher::new(paths));
        let pool = DefaultPathPool::new(ia(1), config(), fetcher.clone()).unwrap();
        (fetcher, Arc::new(pool))
    }

    #[test]
    fn config_validation() {
        assert!(PathPoolConfig::default().validate().is_ok());
        let bad = PathPoolConfig {
            refresh_interval: Duration::from_secs(1),
            min_refresh_delay: Duration::from_secs(2),
        };
        assert!(bad.validate().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn subscribe_fetches_once_per_destination() {
        let (fetcher, pool) = setup(vec![dummy_path(1, 2, &[(1, 1), (2, 1)])]);
        let first: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());
        let second: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());

        assert_eq!(pool.subscribe(ia(2), first).await.unwrap().len(), 1);
        assert_eq!(pool.subscribe(ia(2), second).await.unwrap().len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.cached_paths(ia(2)).len(), 1);
        assert!(pool.cached_paths(ia(3)).is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn concurrent_first_subscribers_share_one_fetch() {
        let (fetcher, pool) = setup(vec![dummy_path(1, 2, &[(1, 1), (2, 1)])]);
        *fetcher.delay.lock().unwrap() = Duration::from_millis(100);
        let first: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());
        let second: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());

        let (a, b) = tokio::join!(
            pool.subscribe(ia(2), first.clone()),
            pool.subscribe(ia(2), second.clone())
        );
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn waiting_subscriber_fetches_after_failed_first_fetch() {
        let (fetcher, pool) = setup(vec![]);
        *fetcher.paths.lock().unwrap() = Err(());
        *fetcher.delay.lock().unwrap() = Duration::from_millis(100);
        let first: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());
        let second: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());

        let (a, b) = tokio::join!(
            pool.subscribe(ia(2), first.clone()),
            pool.subscribe(ia(2), second.clone())
        );
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn subscribe_reports_fetch_errors() {
        let (fetcher, pool) = setup(vec![]);
        *fetcher.paths.lock().unwrap() = Err(());
        let subscriber: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());

        let err = pool.subscribe(ia(2), subscriber).await.unwrap_err();
        assert!(matches!(err, PathPoolError::Fetch { destination, .. } if destination == ia(2)));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn refresh_pushes_to_subscribers() {
        let (fetcher, pool) = setup(vec![dummy_path(1, 2, &[(1, 1), (2, 1)])]);
        let recorder = Arc::new(Recorder::default());
        let subscriber: Arc<dyn PoolSubscriber> = recorder.clone();
        pool.subscribe(ia(2), subscriber.clone()).await.unwrap();

        *fetcher.paths.lock().unwrap() = Ok(vec![
            dummy_path(1, 2, &[(1, 1), (2, 1)]),
            dummy_path(1, 2, &[(1, 2), (2, 2)]),
        ]);

        // Too early, the paths were just fetched.
        pool.refresh(ia(2)).await.unwrap();
        assert!(recorder.refreshes.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        pool.refresh(ia(2)).await.unwrap();
        assert_eq!(*recorder.refreshes.lock().unwrap(), vec![2]);

        pool.unsubscribe(ia(2), &subscriber);
        tokio::time::advance(Duration::from_secs(11)).await;
        pool.refresh(ia(2)).await.unwrap();
        assert_eq!(recorder.refreshes.lock().unwrap().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn expired_paths_are_dropped() {
        let expired = dummy_path(1, 2, &[(1, 1), (2, 1)])
            .with_expiry(SystemTime::now() - Duration::from_secs(1));
        let valid = dummy_path(1, 2, &[(1, 2), (2, 2)])
            .with_expiry(SystemTime::now() + Duration::from_secs(3600));
        let (_, pool) = setup(vec![expired, valid.clone()]);
        let subscriber: Arc<dyn PoolSubscriber> = Arc::new(Recorder::default());

        let paths = pool.subscribe(ia(2), subscriber).await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].fingerprint(), valid.fingerprint());
    }

    #[test_log::test(tokio::test)]
    async fn down_notifications_reach_all_subscribers() {
        let (_, pool) = setup(vec![dummy_path(1, 2, &[(1, 1), (2, 1)])]);
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        pool.subscribe(ia(2), a.clone()).await.unwrap();
        pool.subscribe(ia(3), b.clone()).await.unwrap();

        pool.path_down(PathFingerprint::from([1; 32]), PathInterface::new(ia(5), 1));
        assert_eq!(a.downs.load(Ordering::SeqCst), 1);
        assert_eq!(b.downs.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn refresher_refreshes_subscribed_destinations() {
        let (fetcher, pool) = setup(vec![dummy_path(1, 2, &[(1, 1), (2, 1)])]);
        let recorder = Arc::new(Recorder::default());
        pool.subscribe(ia(2), recorder.clone()).await.unwrap();

        let task = pool.spawn_refresher();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.refreshes.lock().unwrap().len(), 1);

        drop(task);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
