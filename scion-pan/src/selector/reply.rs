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

//! Reply path selection for listening sockets.
//!
//! A listening socket has no path subscription. It replies along the paths its remotes used to
//! reach it. The [DefaultReplySelector] remembers, per remote, the most recently used paths and
//! replies along the most recent one.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use crate::{
    address::UdpAddr,
    path::{Path, PathFingerprint, PathInterface, stats::PathDownReceiver},
    selector::SelectorError,
};

/// Chooses the path for replies of a listening socket.
///
/// Down notifications are delivered through the [PathDownReceiver] supertrait; they may concern
/// paths unrelated to this selector.
pub trait ReplySelector: PathDownReceiver {
    /// Returns the path for the next packet to `remote`. Called for every packet sent without an
    /// explicit path.
    fn path(&self, remote: UdpAddr) -> Option<Arc<Path>>;

    /// Called once when the listening socket is created.
    fn initialize(&self, local: UdpAddr);

    /// Records the path of a packet received from `remote`, reversed to lead back to it.
    ///
    /// Called for every received packet. `None` means the path could not be reversed.
    fn record(&self, remote: UdpAddr, path: Option<Arc<Path>>);

    /// Releases the resources held by the selector.
    fn close(&self) -> Result<(), SelectorError>;
}

/// Configuration for the [`DefaultReplySelector`].
#[derive(Debug, Clone, Copy)]
pub struct ReplySelectorConfig {
    /// Maximum number of paths remembered per remote.
    pub max_reply_paths: usize,
}

impl Default for ReplySelectorConfig {
    fn default() -> Self {
        Self {
            max_reply_paths: 16,
        }
    }
}

impl ReplySelectorConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_reply_paths == 0 {
            return Err("max_reply_paths must be at least 1");
        }
        Ok(())
    }
}

/// Paths ordered from most to least recently used.
#[derive(Debug, Default, Clone)]
pub struct PathsMru(Vec<Arc<Path>>);

impl PathsMru {
    /// Moves `path` to the front.
    ///
    /// A path with a known fingerprint replaces the stored one. A new path is appended while
    /// there is room, otherwise it overwrites the least recently used one.
    pub fn insert(&mut self, path: Arc<Path>, max_entries: usize) {
        let fingerprint = path.fingerprint();
        let i = match self.0.iter().position(|p| p.fingerprint() == fingerprint) {
            Some(i) => {
                self.0[i] = path;
                i
            }
            None if self.0.len() < max_entries => {
                self.0.push(path);
                self.0.len() - 1
            }
            None => {
                let last = self.0.len() - 1;
                self.0[last] = path;
                last
            }
        };
        self.0[..=i].rotate_right(1);
    }

    /// Moves the paths affected by a down notification behind the unaffected ones, keeping the
    /// relative order within both groups. Returns true if the order changed.
    pub fn demote(&mut self, fingerprint: PathFingerprint, interface: &PathInterface) -> bool {
        let (healthy, affected): (Vec<_>, Vec<_>) = self
            .0
            .iter()
            .cloned()
            .partition(|p| !p.is_affected_by(fingerprint, interface));
        if affected.is_empty() || healthy.is_empty() {
            return false;
        }
        let changed = self
            .0
            .iter()
            .take(healthy.len())
            .any(|p| p.is_affected_by(fingerprint, interface));
        self.0 = healthy.into_iter().chain(affected).collect();
        changed
    }

    /// Returns the most recently used path.
    pub fn first(&self) -> Option<&Arc<Path>> {
        self.0.first()
    }

    /// Returns the paths, most recently used first.
    pub fn as_slice(&self) -> &[Arc<Path>] {
        &self.0
    }

    /// Returns the number of paths.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no paths.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
struct RemoteEntry {
    paths: PathsMru,
    seen: Instant,
}

/// Replies along the path most recently used by the remote.
///
/// Down notifications demote the affected paths of each remote, so an unaffected path is used
/// while one is known.
pub struct DefaultReplySelector {
    config: ReplySelectorConfig,
    remotes: RwLock<HashMap<UdpAddr, RemoteEntry>>,
}

impl Default for DefaultReplySelector {
    fn default() -> Self {
        Self {
            config: ReplySelectorConfig::default(),
            remotes: RwLock::new(HashMap::new()),
        }
    }
}

impl DefaultReplySelector {
    /// Creates a new reply selector.
    pub fn new(config: ReplySelectorConfig) -> Result<Self, &'static str> {
        config.validate()?;
        Ok(Self {
            config,
            remotes: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the paths remembered for `remote`, most recently used first.
    pub fn paths(&self, remote: UdpAddr) -> Vec<Arc<Path>> {
        let remotes = self.remotes.read().expect("lock poisoned");
        remotes
            .get(&remote)
            .map(|e| e.paths.as_slice().to_vec())
            .unwrap_or_default()
    }

    /// Forgets the remotes not heard from within `max_idle`. Returns the number of removed
    /// remotes.
    pub fn remove_idle(&self, max_idle: Duration) -> usize {
        let mut remotes = self.remotes.write().expect("lock poisoned");
        let before = remotes.len();
        remotes.retain(|_, e| e.seen.elapsed() <= max_idle);
        before - remotes.len()
    }
}

impl ReplySelector for DefaultReplySelector {
    fn path(&self, remote: UdpAddr) -> Option<Arc<Path>> {
        let remotes = self.remotes.read().expect("lock poisoned");
        remotes.get(&remote).and_then(|e| e.paths.first().cloned())
    }

    fn initialize(&self, _local: UdpAddr) {}

    fn record(&self, remote: UdpAddr, path: Option<Arc<Path>>) {
        let Some(path) = path else {
            return;
        };
        let mut remotes = self.remotes.write().expect("lock poisoned");
        let entry = remotes.entry(remote).or_insert_with(|| {
            RemoteEntry {
                paths: PathsMru::default(),
                seen: Instant::now(),
            }
        });
        entry.seen = Instant::now();
        entry.paths.insert(path, self.config.max_reply_paths);
    }

    fn close(&self) -> Result<(), SelectorError> {
        Ok(())
    }
}

impl PathDownReceiver for DefaultReplySelector {
    fn path_down(&self, fingerprint: PathFingerprint, interface: PathInterface) {
        let mut remotes = self.remotes.write().expect("lock poisoned");
        for (remote, entry) in remotes.iter_mut() {
            if entry.paths.demote(fingerprint, &interface) {
                tracing::debug!(%remote, %fingerprint, "Demoted reply path");
            }
        }
    }
}
