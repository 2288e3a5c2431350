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

//! Per-connection path selection.
//!
//! A [Selector] owns the current path choice of one dialed connection. The connection asks it for
//! a path on every send; the path-refresh subscriber feeds it new candidate sets and down
//! notifications.
//!
//! Available selectors:
//! - [DefaultSelector] keeps using a path until it is reported down.
//! - [PingingSelector] probes the candidates and uses the one with the lowest latency.
//! - [FabridSelector] adds FABRID per-hop validation state to the path before it is used.
//!
//! Listening sockets use a [ReplySelector] instead, see [reply].

use std::sync::Arc;

use crate::{
    address::UdpAddr,
    path::{Path, PathFingerprint, PathInterface},
    pinger::PingError,
};

pub mod default;
pub mod fabrid;
pub mod pinging;
pub mod reply;

pub use default::DefaultSelector;
pub use fabrid::FabridSelector;
pub use pinging::{PingingSelector, PingingSelectorConfig};
pub use reply::{DefaultReplySelector, ReplySelector, ReplySelectorConfig};

/// Chooses the path for the packets of a dialed connection.
///
/// All methods must be safe to call concurrently and must not block on I/O.
pub trait Selector: Send + Sync {
    /// Returns the currently selected path, or `None` if no path is known.
    fn path(&self) -> Option<Arc<Path>>;

    /// Sets the endpoints and the initial candidate paths, most preferred first.
    ///
    /// Called once before [`Selector::path`] is meaningful.
    fn initialize(&self, local: UdpAddr, remote: UdpAddr, paths: Vec<Arc<Path>>);

    /// Replaces the candidate paths. The new set may be reordered or entirely different.
    fn refresh(&self, paths: Vec<Arc<Path>>);

    /// Handles a down notification. The notification may concern paths unknown to the selector.
    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface);

    /// Releases the resources held by the selector.
    fn close(&self) -> Result<(), SelectorError>;
}

/// Selector errors.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// The probing transport could not be closed.
    #[error("failed to close pinger: {0}")]
    Pinger(#[from] PingError),
}

/// The candidate paths of a selector together with the index of the current one.
///
/// Paths and index are always replaced together, so the index is valid for the paths it is read
/// with.
#[derive(Debug, Default, Clone)]
pub struct PathSlot {
    paths: Vec<Arc<Path>>,
    current: usize,
}

impl PathSlot {
    /// Creates a slot selecting `current`. An out of range index selects the first path.
    pub fn new(paths: Vec<Arc<Path>>, current: usize) -> Self {
        let current = if current < paths.len() { current } else { 0 };
        Self { paths, current }
    }

    /// Returns the selected path.
    pub fn current(&self) -> Option<&Arc<Path>> {
        self.paths.get(self.current)
    }

    /// Returns the index of the selected path.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Returns all candidate paths.
    pub fn paths(&self) -> &[Arc<Path>] {
        &self.paths
    }

    /// Selects the path at `index`. Out of range indices are ignored.
    pub fn select(&mut self, index: usize) {
        if index < self.paths.len() {
            self.current = index;
        }
    }

    /// Replaces the candidates and selects `current`.
    pub fn replace(&mut self, paths: Vec<Arc<Path>>, current: usize) {
        *self = Self::new(paths, current);
    }

    /// Replaces the candidates, keeping the selected path if it is still among them.
    ///
    /// Otherwise the first path is selected.
    pub fn replace_keeping_current(&mut self, paths: Vec<Arc<Path>>) {
        let current = self
            .current()
            .map(|c| c.fingerprint())
            .and_then(|fp| paths.iter().position(|p| p.fingerprint() == fp))
            .unwrap_or(0);
        self.replace(paths, current);
    }
}
