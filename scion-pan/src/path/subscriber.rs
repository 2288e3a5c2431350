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

//! Binds a selector to the path pool subscription of its destination.

use std::sync::{Arc, Mutex};

use crate::{
    address::{IsdAsn, UdpAddr},
    path::{
        Path, PathFingerprint, PathInterface,
        policy::{PathPolicy, filtered},
        pool::{PathPool, PathPoolError, PoolSubscriber},
    },
    selector::Selector,
};

/// Feeds the policy filtered paths of one destination into a [Selector].
///
/// Pool refreshes and policy changes both end up in [`Selector::refresh`]; down notifications are
/// forwarded unchanged.
pub struct PathRefreshSubscriber {
    destination: IsdAsn,
    policy: Mutex<Option<Arc<dyn PathPolicy>>>,
    target: Arc<dyn Selector>,
    pool: Arc<dyn PathPool>,
}

impl PathRefreshSubscriber {
    /// Subscribes to the paths to `remote` and initializes `target` with the filtered initial
    /// path set.
    pub async fn open(
        pool: Arc<dyn PathPool>,
        local: UdpAddr,
        remote: UdpAddr,
        policy: Option<Arc<dyn PathPolicy>>,
        target: Arc<dyn Selector>,
    ) -> Result<Arc<Self>, PathPoolError> {
        let subscriber = Arc::new(Self {
            destination: remote.isd_asn,
            policy: Mutex::new(policy),
            target,
            pool: pool.clone(),
        });
        let paths = pool
            .subscribe(
                subscriber.destination,
                subscriber.clone() as Arc<dyn PoolSubscriber>,
            )
            .await?;
        let paths = subscriber.filter(paths);
        tracing::debug!(
            destination = %subscriber.destination,
            count = paths.len(),
            "Subscribed to paths"
        );
        subscriber.target.initialize(local, remote, paths);
        Ok(subscriber)
    }

    /// Replaces the policy and pushes the re-filtered cached paths to the selector.
    pub fn set_policy(&self, policy: Option<Arc<dyn PathPolicy>>) {
        *self.policy.lock().expect("lock poisoned") = policy;
        let paths = self.filter(self.pool.cached_paths(self.destination));
        self.target.refresh(paths);
    }

    /// Cancels the pool subscription. The selector is left open.
    pub fn close(self: &Arc<Self>) {
        let subscriber: Arc<dyn PoolSubscriber> = self.clone();
        self.pool.unsubscribe(self.destination, &subscriber);
    }

    fn filter(&self, paths: Vec<Arc<Path>>) -> Vec<Arc<Path>> {
        let policy = self.policy.lock().expect("lock poisoned").clone();
        filtered(policy.as_deref(), paths)
    }
}

impl PoolSubscriber for PathRefreshSubscriber {
    fn refresh(&self, destination: IsdAsn, paths: Vec<Arc<Path>>) {
        if destination != self.destination {
            return;
        }
        self.target.refresh(self.filter(paths));
    }

    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
        self.target.path_down(fingerprint, interface);
    }
}
