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

//! Pin-and-failover selection over FABRID paths.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    address::UdpAddr,
    fabrid::{
        ControlPlaneConnector, FabridClient, FabridDataplanePath, FabridError, hops_for_path,
    },
    path::{DataplanePath, Path, PathFingerprint, PathInterface, stats::PathStats},
    selector::{PathSlot, Selector, SelectorError, default::fail_over},
};

/// Wraps the first path with FABRID validation state and then behaves like the
/// [DefaultSelector](crate::selector::DefaultSelector).
///
/// If the path cannot be wrapped, e.g. because the control service is unreachable, the error is
/// logged and the path is used without FABRID. Refreshed path sets keep the wrapped paths of the
/// previous set, new paths are not wrapped.
pub struct FabridSelector {
    client: Arc<FabridClient>,
    connector: Arc<dyn ControlPlaneConnector>,
    stats: Arc<dyn PathStats>,
    slot: Mutex<PathSlot>,
}

impl FabridSelector {
    /// Creates a new selector.
    pub fn new(
        client: Arc<FabridClient>,
        connector: Arc<dyn ControlPlaneConnector>,
        stats: Arc<dyn PathStats>,
    ) -> Self {
        Self {
            client,
            connector,
            stats,
            slot: Mutex::new(PathSlot::default()),
        }
    }

    fn wrap(&self, local: UdpAddr, remote: UdpAddr, path: &Path) -> Result<Path, FabridError> {
        let DataplanePath::Standard(raw) = &path.forwarding.dataplane else {
            return Err(FabridError::InvalidPath(
                "only standard paths can carry FABRID state".into(),
            ));
        };
        let hops = hops_for_path(path.interfaces(), self.client.config().policy)?;
        // Path state is only created for paths that end up wrapped.
        let session = self.connector.connect(local.ip)?;
        let mut fabrid_path = FabridDataplanePath::new(
            raw.clone(),
            path.interfaces().to_vec(),
            hops,
            local.scion_addr(),
            remote.scion_addr(),
            self.client.new_path_state(path.fingerprint()),
        )?;
        fabrid_path.register_drkey_client(session);
        Ok(path.with_dataplane(DataplanePath::Fabrid(Arc::new(fabrid_path))))
    }
}

impl Selector for FabridSelector {
    fn path(&self) -> Option<Arc<Path>> {
        self.slot.lock().expect("lock poisoned").current().cloned()
    }

    fn initialize(&self, local: UdpAddr, remote: UdpAddr, mut paths: Vec<Arc<Path>>) {
        if let Some(first) = paths.first_mut() {
            match self.wrap(local, remote, first) {
                Ok(wrapped) => {
                    tracing::debug!(fingerprint = %first.fingerprint(), "Using FABRID path");
                    *first = Arc::new(wrapped);
                }
                Err(e) => {
                    tracing::error!(
                        fingerprint = %first.fingerprint(),
                        error = %e,
                        "Failed to create FABRID path, using it without FABRID"
                    );
                }
            }
        }
        self.slot.lock().expect("lock poisoned").replace(paths, 0);
    }

    fn refresh(&self, paths: Vec<Arc<Path>>) {
        let mut slot = self.slot.lock().expect("lock poisoned");
        let wrapped: HashMap<PathFingerprint, Arc<Path>> = slot
            .paths()
            .iter()
            .filter(|p| p.forwarding.dataplane.is_fabrid())
            .map(|p| (p.fingerprint(), p.clone()))
            .collect();
        let paths = paths
            .into_iter()
            .map(|p| wrapped.get(&p.fingerprint()).cloned().unwrap_or(p))
            .collect();
        slot.replace_keeping_current(paths);
    }

    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
        let mut slot = self.slot.lock().expect("lock poisoned");
        fail_over(&mut slot, self.stats.as_ref(), fingerprint, interface);
    }

    fn close(&self) -> Result<(), SelectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::{
        fabrid::{FabridConfig, FabridPolicy, test_util::FakeConnector},
        path::{
            stats::DefaultPathStats,
            test_builder::{TestPathBuilder, dummy_path, ia},
        },
    };

    fn endpoints() -> (UdpAddr, UdpAddr) {
        (
            UdpAddr::new(ia(1), Ipv4Addr::new(10, 0, 0, 1).into(), 1000),
            UdpAddr::new(ia(3), Ipv4Addr::new(10, 0, 0, 3).into(), 2000),
        )
    }

    fn paths() -> Vec<Arc<Path>> {
        vec![
            Arc::new(
                TestPathBuilder::new(ia(1), ia(3))
                    .add_hop(ia(1), 0, 1)
                    .add_hop(ia(2), 2, 3)
                    .add_hop(ia(3), 4, 0)
                    .build(),
            ),
            Arc::new(dummy_path(1, 3, &[(1, 2), (3, 5)])),
        ]
    }

    fn selector(connector: Arc<FakeConnector>) -> (FabridSelector, Arc<FabridClient>) {
        let (local, remote) = endpoints();
        let client = Arc::new(FabridClient::new(
            local.scion_addr(),
            remote.scion_addr(),
            FabridConfig {
                policy: FabridPolicy::Local(3),
                ..Default::default()
            },
        ));
        let selector = FabridSelector::new(
            client.clone(),
            connector,
            Arc::new(DefaultPathStats::new()),
        );
        (selector, client)
    }

    fn fabrid_dataplane(path: &Path) -> &FabridDataplanePath {
        match &path.forwarding.dataplane {
            DataplanePath::Fabrid(p) => p,
            other => panic!("expected a FABRID path, got {other:?}"),
        }
    }

    #[test]
    fn initialize_wraps_first_path() {
        let connector = Arc::new(FakeConnector::default());
        let (selector, client) = selector(connector.clone());
        let (local, remote) = endpoints();
        let paths = paths();
        selector.initialize(local, remote, paths.clone());

        let current = selector.path().unwrap();
        assert_eq!(current.fingerprint(), paths[0].fingerprint());
        let fabrid = fabrid_dataplane(&current);
        assert_eq!(fabrid.hops().len(), 3);
        assert!(fabrid.hops().iter().all(|h| h.policy == FabridPolicy::Local(3)));
        assert!(client.path_state(paths[0].fingerprint()).is_some());
        assert_eq!(connector.connects(), 1);

        // The caller's path is untouched.
        assert!(!paths[0].forwarding.dataplane.is_fabrid());
    }

    #[test]
    fn control_plane_failure_keeps_unwrapped_path() {
        let (selector, client) = selector(Arc::new(FakeConnector::failing()));
        let (local, remote) = endpoints();
        let paths = paths();
        selector.initialize(local, remote, paths.clone());

        let current = selector.path().unwrap();
        assert_eq!(current.fingerprint(), paths[0].fingerprint());
        assert!(!current.forwarding.dataplane.is_fabrid());
        assert!(client.path_state(paths[0].fingerprint()).is_none());
        assert!(client.pending_options(paths[0].fingerprint()).is_empty());
    }

    #[test]
    fn empty_initialization() {
        let (selector, _client) = selector(Arc::new(FakeConnector::default()));
        let (local, remote) = endpoints();
        selector.initialize(local, remote, vec![]);
        assert!(selector.path().is_none());
    }

    #[test]
    fn refresh_keeps_wrapped_path() {
        let connector = Arc::new(FakeConnector::default());
        let (selector, _client) = selector(connector.clone());
        let (local, remote) = endpoints();
        let paths = paths();
        selector.initialize(local, remote, paths.clone());

        selector.refresh(vec![paths[1].clone(), paths[0].clone()]);
        let current = selector.path().unwrap();
        assert_eq!(current.fingerprint(), paths[0].fingerprint());
        assert!(current.forwarding.dataplane.is_fabrid());
        assert_eq!(connector.connects(), 1, "refresh does not wrap");
    }

    #[test]
    fn fails_over_to_unwrapped_path() {
        let stats = Arc::new(DefaultPathStats::new());
        let (local, remote) = endpoints();
        let client = Arc::new(FabridClient::new(
            local.scion_addr(),
            remote.scion_addr(),
            FabridConfig::default(),
        ));
        let selector = FabridSelector::new(
            client,
            Arc::new(FakeConnector::default()),
            stats.clone(),
        );
        let paths = paths();
        selector.initialize(local, remote, paths.clone());

        let down = PathInterface::new(ia(2), 2);
        stats.notify_path_down(paths[0].fingerprint(), down);
        selector.path_down(paths[0].fingerprint(), down);
        let current = selector.path().unwrap();
        assert_eq!(current.fingerprint(), paths[1].fingerprint());
        assert!(!current.forwarding.dataplane.is_fabrid());
    }
}
