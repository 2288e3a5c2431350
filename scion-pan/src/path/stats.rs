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

//! Liveness and latency registry.
//!
//! The registry is shared by all connections of a process. Probing loops record latency
//! samples, SCMP handlers record down notifications, and selectors query both to decide which
//! path to use.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

#[cfg(test)]
use mockall::automock;

use crate::{
    address::ScionAddr,
    path::{Path, PathFingerprint, PathInterface},
    types::Subscribers,
};

/// Receives liveness down notifications.
pub trait PathDownReceiver: Send + Sync {
    /// Called for every down notification. The notification may concern paths unknown to the
    /// receiver. This function must return immediately and not block.
    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface);
}

/// Liveness and latency registry. Implementations must be safe to call concurrently.
#[cfg_attr(test, automock)]
pub trait PathStats: Send + Sync {
    /// Records a round trip time sample for a path to `remote`.
    fn record_latency(&self, remote: ScionAddr, fingerprint: PathFingerprint, latency: Duration);

    /// Records a down notification and forwards it to all subscribers.
    fn notify_path_down(&self, fingerprint: PathFingerprint, interface: PathInterface);

    /// Returns the index of the path with the lowest recorded latency to `remote`.
    ///
    /// Ties are resolved in list order. Returns 0 for an empty list.
    fn lowest_latency(&self, remote: ScionAddr, paths: &[Arc<Path>]) -> usize;

    /// Returns the index of the first path in `paths` that has been notified down less
    /// recently than `current`, if any.
    fn first_more_alive(&self, current: &Path, paths: &[Arc<Path>]) -> Option<usize>;

    /// Subscribes to down notifications.
    fn subscribe(&self, receiver: Arc<dyn PathDownReceiver>);

    /// Cancels a subscription made with [`PathStats::subscribe`].
    fn unsubscribe(&self, receiver: &Arc<dyn PathDownReceiver>);
}

#[derive(Debug, Default)]
struct DestinationStats {
    latency: HashMap<PathFingerprint, Duration>,
}

#[derive(Debug, Default)]
struct StatsInner {
    destinations: HashMap<ScionAddr, DestinationStats>,
    path_down: HashMap<PathFingerprint, Instant>,
    interface_down: HashMap<PathInterface, Instant>,
}

impl StatsInner {
    /// Newest down notification that concerns the path. `None` if it was never notified down.
    fn newest_down_notification(&self, path: &Path) -> Option<Instant> {
        let by_path = self.path_down.get(&path.fingerprint()).copied();
        path.interfaces()
            .iter()
            .filter_map(|i| self.interface_down.get(i).copied())
            .chain(by_path)
            .max()
    }
}

/// In-memory liveness and latency registry.
///
/// Keeps the latest latency sample per (remote, path) and the time of the newest down
/// notification per path and per interface.
#[derive(Default)]
pub struct DefaultPathStats {
    inner: RwLock<StatsInner>,
    subscribers: Subscribers<dyn PathDownReceiver>,
}

impl DefaultPathStats {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest latency sample for the path to `remote`, if any.
    pub fn latency(&self, remote: ScionAddr, fingerprint: PathFingerprint) -> Option<Duration> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .destinations
            .get(&remote)
            .and_then(|d| d.latency.get(&fingerprint).copied())
    }

    /// Returns true if the path was ever notified down.
    pub fn is_notified_down(&self, path: &Path) -> bool {
        let inner = self.inner.read().expect("lock poisoned");
        inner.newest_down_notification(path).is_some()
    }
}

impl PathStats for DefaultPathStats {
    fn record_latency(&self, remote: ScionAddr, fingerprint: PathFingerprint, latency: Duration) {
        tracing::trace!(%remote, %fingerprint, ?latency, "Recording latency sample");
        let mut inner = self.inner.write().expect("lock poisoned");
        inner
            .destinations
            .entry(remote)
            .or_default()
            .latency
            .insert(fingerprint, latency);
    }

    fn notify_path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
        tracing::debug!(%fingerprint, %interface, "Path down notification");
        {
            let now = Instant::now();
            let mut inner = self.inner.write().expect("lock poisoned");
            inner.path_down.insert(fingerprint, now);
            inner.interface_down.insert(interface, now);
        }
        self.subscribers
            .for_each(|receiver| receiver.path_down(fingerprint, interface));
    }

    fn lowest_latency(&self, remote: ScionAddr, paths: &[Arc<Path>]) -> usize {
        let inner = self.inner.read().expect("lock poisoned");
        let Some(stats) = inner.destinations.get(&remote) else {
            return 0;
        };

        // Unmeasured paths rank after every measured one.
        let mut best = 0;
        let mut best_latency = Duration::MAX;
        for (i, path) in paths.iter().enumerate() {
            let latency = stats
                .latency
                .get(&path.fingerprint())
                .copied()
                .unwrap_or(Duration::MAX);
            if latency < best_latency {
                best = i;
                best_latency = latency;
            }
        }
        best
    }

    fn first_more_alive(&self, current: &Path, paths: &[Arc<Path>]) -> Option<usize> {
        let inner = self.inner.read().expect("lock poisoned");
        let current_down = inner.newest_down_notification(current);
        paths.iter().position(|candidate| {
            candidate.fingerprint() != current.fingerprint()
                && inner.newest_down_notification(candidate) < current_down
        })
    }

    fn subscribe(&self, receiver: Arc<dyn PathDownReceiver>) {
        self.subscribers.register(receiver);
    }

    fn unsubscribe(&self, receiver: &Arc<dyn PathDownReceiver>) {
        self.subscribers.unregister(receiver);
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, sync::Mutex};

    use super::*;
    use crate::path::test_builder::{dummy_path, ia};

    fn remote() -> ScionAddr {
        ScionAddr::new(ia(2), Ipv4Addr::new(10, 0, 0, 2).into())
    }

    fn paths() -> Vec<Arc<Path>> {
        vec![
            Arc::new(dummy_path(1, 2, &[(1, 1), (2, 1)])),
            Arc::new(dummy_path(1, 2, &[(1, 2), (2, 2)])),
            Arc::new(dummy_path(1, 2, &[(1, 3), (2, 3)])),
        ]
    }

    mod latency {
        use super::*;

        #[test]
        fn lowest_latency_prefers_measured_paths() {
            let stats = DefaultPathStats::new();
            let paths = paths();
            assert_eq!(stats.lowest_latency(remote(), &paths), 0);

            stats.record_latency(remote(), paths[2].fingerprint(), Duration::from_millis(40));
            assert_eq!(stats.lowest_latency(remote(), &paths), 2);

            stats.record_latency(remote(), paths[1].fingerprint(), Duration::from_millis(10));
            assert_eq!(stats.lowest_latency(remote(), &paths), 1);
        }

        #[test]
        fn ties_keep_list_order() {
            let stats = DefaultPathStats::new();
            let paths = paths();
            for p in &paths {
                stats.record_latency(remote(), p.fingerprint(), Duration::from_millis(5));
            }
            assert_eq!(stats.lowest_latency(remote(), &paths), 0);
        }

        #[test]
        fn latest_sample_wins() {
            let stats = DefaultPathStats::new();
            let fp = paths()[0].fingerprint();
            stats.record_latency(remote(), fp, Duration::from_millis(5));
            stats.record_latency(remote(), fp, Duration::from_millis(50));
            assert_eq!(stats.latency(remote(), fp), Some(Duration::from_millis(50)));
        }
    }

    mod liveness {
        use super::*;

        struct Recorder(Mutex<Vec<(PathFingerprint, PathInterface)>>);

        impl PathDownReceiver for Recorder {
            fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
                self.0.lock().unwrap().push((fingerprint, interface));
            }
        }

        #[test]
        fn first_more_alive_skips_paths_notified_more_recently() {
            let stats = DefaultPathStats::new();
            let paths = paths();

            // Nothing was notified down, nothing is more alive than the current path.
            assert_eq!(stats.first_more_alive(&paths[0], &paths), None);

            stats.notify_path_down(paths[0].fingerprint(), PathInterface::new(ia(1), 1));
            assert_eq!(stats.first_more_alive(&paths[0], &paths), Some(1));

            std::thread::sleep(Duration::from_millis(2));
            stats.notify_path_down(paths[1].fingerprint(), PathInterface::new(ia(1), 2));
            // Path 0 went down before path 1, so it is considered more alive now.
            assert_eq!(stats.first_more_alive(&paths[1], &paths), Some(0));
            assert_eq!(stats.first_more_alive(&paths[2], &paths), None);
        }

        #[test]
        fn interface_notifications_affect_all_paths_through_it() {
            let stats = DefaultPathStats::new();
            let paths = paths();
            stats.notify_path_down(PathFingerprint::from([0; 32]), PathInterface::new(ia(2), 2));

            assert!(!stats.is_notified_down(&paths[0]));
            assert!(stats.is_notified_down(&paths[1]));
        }

        #[test]
        fn down_notifications_reach_subscribers() {
            let stats = DefaultPathStats::new();
            let recorder = Arc::new(Recorder(Mutex::new(vec![])));
            let receiver: Arc<dyn PathDownReceiver> = recorder.clone();
            stats.subscribe(receiver.clone());

            let interface = PathInterface::new(ia(1), 7);
            stats.notify_path_down(paths()[0].fingerprint(), interface);
            assert_eq!(recorder.0.lock().unwrap().len(), 1);

            stats.unsubscribe(&receiver);
            stats.notify_path_down(paths()[0].fingerprint(), interface);
            assert_eq!(recorder.0.lock().unwrap().len(), 1);
        }
    }
}
