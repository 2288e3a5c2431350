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

//! Latency based selection.
//!
//! The [PingingSelector] always uses the candidate with the lowest latency recorded in the
//! registry. Once activated with [`PingingSelector::set_active`] it runs a
//! [ProbingEngine](crate::pinger::engine::ProbingEngine) that keeps the samples of the first
//! candidates fresh.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    address::UdpAddr,
    path::{Path, PathFingerprint, PathInterface, stats::PathStats},
    pinger::{
        Pinger, PingerFactory,
        engine::{ProbeTargets, ProbingEngine},
    },
    selector::{PathSlot, Selector, SelectorError},
};

/// Configuration for the [`PingingSelector`].
#[derive(Debug, Clone, Copy)]
pub struct PingingSelectorConfig {
    /// Interval between probing rounds.
    pub interval: Duration,
    /// Time to wait for the replies of a round. Paths that did not reply in time are recorded
    /// with this latency.
    pub timeout: Duration,
    /// Payload size of the echo requests in bytes.
    pub payload_size: usize,
}

impl Default for PingingSelectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
            payload_size: 16,
        }
    }
}

impl PingingSelectorConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.timeout.is_zero() {
            return Err("timeout must be positive");
        }
        if self.timeout >= self.interval {
            // Otherwise probing rounds would overlap.
            return Err("timeout must be smaller than interval");
        }
        Ok(())
    }
}

#[derive(Default)]
struct PingingState {
    endpoints: Option<(UdpAddr, UdpAddr)>,
    slot: PathSlot,
}

/// State shared between the selector and its probing task.
struct PingingShared {
    stats: Arc<dyn PathStats>,
    num_active: AtomicUsize,
    state: Mutex<PingingState>,
}

impl PingingShared {
    fn reselect(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        let Some((_, remote)) = state.endpoints else {
            return;
        };
        let best = self
            .stats
            .lowest_latency(remote.scion_addr(), state.slot.paths());
        state.slot.select(best);
    }
}

impl ProbeTargets for PingingShared {
    fn probe_candidates(&self) -> Vec<Arc<Path>> {
        let num_active = self.num_active.load(Ordering::Relaxed);
        let state = self.state.lock().expect("lock poisoned");
        state.slot.paths().iter().take(num_active).cloned().collect()
    }

    fn probes_completed(&self) {
        self.reselect();
    }
}

enum Probing {
    Idle,
    Running {
        pinger: Arc<dyn Pinger>,
        _task: ProbingTask,
    },
    Closed,
}

struct ProbingTask {
    _task: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl Drop for ProbingTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Uses the candidate with the lowest recorded latency to the remote host.
///
/// Reselects on every refresh, on every down notification and after every probing round.
pub struct PingingSelector {
    config: PingingSelectorConfig,
    pinger_factory: Arc<dyn PingerFactory>,
    shared: Arc<PingingShared>,
    probing: Mutex<Probing>,
}

impl PingingSelector {
    /// Creates a new selector. Probing does not start before [`PingingSelector::set_active`].
    pub fn new(
        stats: Arc<dyn PathStats>,
        pinger_factory: Arc<dyn PingerFactory>,
        config: PingingSelectorConfig,
    ) -> Result<Self, &'static str> {
        config.validate()?;
        Ok(Self {
            config,
            pinger_factory,
            shared: Arc::new(PingingShared {
                stats,
                num_active: AtomicUsize::new(0),
                state: Mutex::new(PingingState::default()),
            }),
            probing: Mutex::new(Probing::Idle),
        })
    }

    /// Sets how many of the first candidates are probed each round.
    ///
    /// Starts probing on first use. Paths within the local AS are never probed.
    pub fn set_active(&self, num_active: usize) {
        self.ensure_running();
        self.shared.num_active.store(num_active, Ordering::Relaxed);
    }

    fn ensure_running(&self) {
        let mut probing = self.probing.lock().expect("lock poisoned");
        if !matches!(*probing, Probing::Idle) {
            return;
        }

        let endpoints = self.shared.state.lock().expect("lock poisoned").endpoints;
        let Some((local, remote)) = endpoints else {
            tracing::debug!("Selector not initialized, not probing yet");
            return;
        };
        if local.isd_asn == remote.isd_asn {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime available, cannot start probing");
            return;
        };
        let (pinger, replies) = match self.pinger_factory.open(local) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(%local, error = %e, "Failed to open pinger, not probing");
                return;
            }
        };

        let engine = ProbingEngine::new(
            remote.scion_addr(),
            self.config,
            pinger.clone(),
            replies,
            self.shared.stats.clone(),
            self.shared.clone(),
        );
        let cancel_token = CancellationToken::new();
        let task = {
            let cancel_token = cancel_token.clone();
            async move {
                let exit_reason = engine.run(cancel_token).await;
                tracing::info!(exit_reason, "Probing task exiting");
            }
        };
        let span = tracing::info_span!("probing", %remote);
        tracing::debug!(%remote, "Starting to probe paths");

        *probing = Probing::Running {
            pinger,
            _task: ProbingTask {
                _task: runtime.spawn(task.instrument(span)),
                cancel_token,
            },
        };
    }

    fn lowest_latency_index(&self, state: &PingingState, paths: &[Arc<Path>]) -> usize {
        match state.endpoints {
            Some((_, remote)) => self.shared.stats.lowest_latency(remote.scion_addr(), paths),
            None => 0,
        }
    }
}

impl Selector for PingingSelector {
    fn path(&self) -> Option<Arc<Path>> {
        let state = self.shared.state.lock().expect("lock poisoned");
        state.slot.current().cloned()
    }

    fn initialize(&self, local: UdpAddr, remote: UdpAddr, paths: Vec<Arc<Path>>) {
        let mut state = self.shared.state.lock().expect("lock poisoned");
        state.endpoints = Some((local, remote));
        let best = self.lowest_latency_index(&state, &paths);
        state.slot.replace(paths, best);
    }

    fn refresh(&self, paths: Vec<Arc<Path>>) {
        let mut state = self.shared.state.lock().expect("lock poisoned");
        let best = self.lowest_latency_index(&state, &paths);
        state.slot.replace(paths, best);
    }

    fn path_down(&self, _fingerprint: PathFingerprint, _interface: PathInterface) {
        self.shared.reselect();
    }

    fn close(&self) -> Result<(), SelectorError> {
        let mut probing = self.probing.lock().expect("lock poisoned");
        if let Probing::Running { pinger, .. } = std::mem::replace(&mut *probing, Probing::Closed)
        {
            pinger.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::{
        path::{
            stats::{DefaultPathStats, MockPathStats},
            test_builder::{dummy_path, ia},
        },
        pinger::{PingReply, PingReplyError, test_util::FakePingerFactory},
    };

    fn endpoints(remote_asn: u64) -> (UdpAddr, UdpAddr) {
        (
            UdpAddr::new(ia(1), Ipv4Addr::new(10, 0, 0, 1).into(), 1000),
            UdpAddr::new(ia(remote_asn), Ipv4Addr::new(10, 0, 0, 2).into(), 2000),
        )
    }

    fn paths() -> Vec<Arc<Path>> {
        vec![
            Arc::new(dummy_path(1, 2, &[(1, 1), (2, 1)])),
            Arc::new(dummy_path(1, 2, &[(1, 2), (2, 2)])),
            Arc::new(dummy_path(1, 2, &[(1, 3), (2, 3)])),
        ]
    }

    fn selector(stats: Arc<dyn PathStats>) -> (PingingSelector, Arc<FakePingerFactory>) {
        let factory = Arc::new(FakePingerFactory::default());
        let selector =
            PingingSelector::new(stats, factory.clone(), PingingSelectorConfig::default()).unwrap();
        (selector, factory)
    }

    mod config {
        use super::*;

        #[test]
        fn timeout_must_be_smaller_than_interval() {
            assert!(PingingSelectorConfig::default().validate().is_ok());

            let overlapping = PingingSelectorConfig {
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(1),
                payload_size: 16,
            };
            assert!(overlapping.validate().is_err());

            let zero = PingingSelectorConfig {
                timeout: Duration::ZERO,
                ..Default::default()
            };
            assert!(zero.validate().is_err());
        }
    }

    mod selection {
        use super::*;

        #[test]
        fn selects_what_the_registry_ranks_lowest() {
            let mut stats = MockPathStats::new();
            let calls = AtomicUsize::new(0);
            stats
                .expect_lowest_latency()
                .times(2)
                .returning(move |_, _| match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => 2,
                    _ => 0,
                });
            let (selector, _) = selector(Arc::new(stats));
            let (local, remote) = endpoints(2);
            let paths = paths();

            selector.initialize(local, remote, paths.clone());
            assert_eq!(selector.path().unwrap().fingerprint(), paths[2].fingerprint());

            selector.path_down(paths[2].fingerprint(), PathInterface::new(ia(2), 3));
            assert_eq!(selector.path().unwrap().fingerprint(), paths[0].fingerprint());
        }

        #[test]
        fn refresh_may_drop_the_previous_choice() {
            let stats = Arc::new(DefaultPathStats::new());
            let (selector, _) = selector(stats.clone());
            let (local, remote) = endpoints(2);
            let paths = paths();
            let remote_host = remote.scion_addr();
            stats.record_latency(remote_host, paths[0].fingerprint(), Duration::from_millis(5));
            stats.record_latency(remote_host, paths[1].fingerprint(), Duration::from_millis(50));
            stats.record_latency(remote_host, paths[2].fingerprint(), Duration::from_millis(20));

            selector.initialize(local, remote, paths.clone());
            assert_eq!(selector.path().unwrap().fingerprint(), paths[0].fingerprint());

            selector.refresh(vec![paths[1].clone(), paths[2].clone()]);
            assert_eq!(selector.path().unwrap().fingerprint(), paths[2].fingerprint());

            selector.refresh(vec![]);
            assert!(selector.path().is_none());
        }
    }

    mod probing {
        use super::*;

        #[test_log::test(tokio::test)]
        async fn local_destinations_are_not_probed() {
            let (selector, factory) = selector(Arc::new(DefaultPathStats::new()));
            let (local, remote) = endpoints(1);
            selector.initialize(local, remote, vec![]);

            selector.set_active(2);
            assert_eq!(factory.opened.load(Ordering::SeqCst), 0);
        }

        #[test_log::test(tokio::test)]
        async fn probing_starts_once() {
            let (selector, factory) = selector(Arc::new(DefaultPathStats::new()));
            let (local, remote) = endpoints(2);
            selector.initialize(local, remote, paths());

            selector.set_active(1);
            selector.set_active(3);
            assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        }

        #[test_log::test(tokio::test)]
        async fn failed_open_is_retried_on_next_activation() {
            let (selector, factory) = selector(Arc::new(DefaultPathStats::new()));
            let (local, remote) = endpoints(2);
            selector.initialize(local, remote, paths());

            factory.fail.store(true, Ordering::SeqCst);
            selector.set_active(1);
            assert_eq!(factory.opened.load(Ordering::SeqCst), 0);

            factory.fail.store(false, Ordering::SeqCst);
            selector.set_active(1);
            assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        }

        #[test_log::test(tokio::test(start_paused = true))]
        async fn probing_round_reselects_lowest_latency() {
            let stats = Arc::new(DefaultPathStats::new());
            let (selector, factory) = selector(stats.clone());
            let (local, remote) = endpoints(2);
            let paths = paths();
            selector.initialize(local, remote, paths.clone());
            selector.set_active(2);
            assert_eq!(selector.path().unwrap().fingerprint(), paths[0].fingerprint());

            tokio::time::sleep(Duration::from_millis(1010)).await;
            let (pinger, replies) = factory.pingers.lock().unwrap()[0].clone();
            let sent = pinger.sent();
            assert_eq!(
                sent,
                vec![(paths[0].fingerprint(), 1), (paths[1].fingerprint(), 1)]
            );

            for (path, rtt) in [(&paths[0], 80), (&paths[1], 10)] {
                replies
                    .send(PingReply {
                        source: remote.scion_addr(),
                        sequence_number: 1,
                        path_fingerprint: Some(path.fingerprint()),
                        rtt: Duration::from_millis(rtt),
                        error: None,
                    })
                    .await
                    .unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(selector.path().unwrap().fingerprint(), paths[1].fingerprint());

            selector.close().unwrap();
            assert!(pinger.is_closed());
            // Closing twice is fine and does not restart probing.
            selector.close().unwrap();
            selector.set_active(2);
            assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        }

        #[test_log::test(tokio::test(start_paused = true))]
        async fn close_during_open_round_stops_probing() {
            let stats = Arc::new(DefaultPathStats::new());
            let (selector, factory) = selector(stats.clone());
            let (local, remote) = endpoints(2);
            let paths = paths();
            selector.initialize(local, remote, paths.clone());
            selector.set_active(2);

            tokio::time::sleep(Duration::from_millis(1010)).await;
            let (pinger, replies) = factory.pingers.lock().unwrap()[0].clone();
            assert_eq!(pinger.sent().len(), 2);

            selector.close().unwrap();
            assert!(pinger.is_closed());

            // Late replies and the round timeout have no effect.
            let _ = replies
                .send(PingReply {
                    source: remote.scion_addr(),
                    sequence_number: 1,
                    path_fingerprint: Some(paths[0].fingerprint()),
                    rtt: Duration::from_millis(10),
                    error: None,
                })
                .await;
            let _ = replies
                .send(PingReply {
                    source: remote.scion_addr(),
                    sequence_number: 1,
                    path_fingerprint: Some(paths[1].fingerprint()),
                    rtt: Duration::from_millis(10),
                    error: Some(PingReplyError::ExternalInterfaceDown {
                        isd_asn: ia(1),
                        interface: 2,
                    }),
                })
                .await;
            tokio::time::sleep(Duration::from_secs(2)).await;

            let remote_host = remote.scion_addr();
            assert!(
                paths
                    .iter()
                    .all(|p| stats.latency(remote_host, p.fingerprint()).is_none())
            );
            assert!(!stats.is_notified_down(&paths[1]));
            assert_eq!(pinger.sent().len(), 2);
            assert_eq!(selector.path().unwrap().fingerprint(), paths[0].fingerprint());
        }
    }
}
