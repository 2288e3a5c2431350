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

//! Pin-and-failover selection.

use std::sync::{Arc, Mutex};

use crate::{
    address::UdpAddr,
    path::{Path, PathFingerprint, PathInterface, stats::PathStats},
    selector::{PathSlot, Selector, SelectorError},
};

/// Keeps using the first path until it is reported down.
///
/// On a down notification that affects the current path, switches to the first candidate that was
/// notified down less recently than the current one. A refresh keeps the current path if it is
/// still a candidate.
pub struct DefaultSelector {
    stats: Arc<dyn PathStats>,
    slot: Mutex<PathSlot>,
}

impl DefaultSelector {
    /// Creates a new selector querying `stats` on failover.
    pub fn new(stats: Arc<dyn PathStats>) -> Self {
        Self {
            stats,
            slot: Mutex::new(PathSlot::default()),
        }
    }
}

impl Selector for DefaultSelector {
    fn path(&self) -> Option<Arc<Path>> {
        self.slot.lock().expect("lock poisoned").current().cloned()
    }

    fn initialize(&self, _local: UdpAddr, _remote: UdpAddr, paths: Vec<Arc<Path>>) {
        self.slot.lock().expect("lock poisoned").replace(paths, 0);
    }

    fn refresh(&self, paths: Vec<Arc<Path>>) {
        self.slot
            .lock()
            .expect("lock poisoned")
            .replace_keeping_current(paths);
    }

    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
        let mut slot = self.slot.lock().expect("lock poisoned");
        fail_over(&mut slot, self.stats.as_ref(), fingerprint, interface);
    }

    fn close(&self) -> Result<(), SelectorError> {
        Ok(())
    }
}

/// Switches away from the current path if the notification affects it and a more alive candidate
/// exists. Returns true if the selection changed.
pub(crate) fn fail_over(
    slot: &mut PathSlot,
    stats: &dyn PathStats,
    fingerprint: PathFingerprint,
    interface: PathInterface,
) -> bool {
    let Some(current) = slot.current() else {
        return false;
    };
    if !current.is_affected_by(fingerprint, &interface) {
        return false;
    }

    match stats.first_more_alive(current, slot.paths()) {
        Some(better) => {
            tracing::debug!(
                from = %current.fingerprint(),
                to = %slot.paths()[better].fingerprint(),
                "Current path is down, failing over"
            );
            // Repeated notifications keep cycling through the candidates.
            slot.select(better);
            true
        }
        None => {
            tracing::debug!(
                current = %current.fingerprint(),
                "Current path is down, no better candidate"
            );
            false
        }
    }
}
