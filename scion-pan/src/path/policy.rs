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

//! Path policies restrict and order the paths a connection may use.
//!
//! For example, filtering out paths that go through certain ASes, or preferring shorter paths.

use std::sync::Arc;

use crate::path::Path;

/// A path policy filters the candidate paths and orders them by preference.
pub trait PathPolicy: 'static + Send + Sync {
    /// Returns the allowed paths, most preferred first.
    fn filter(&self, paths: Vec<Arc<Path>>) -> Vec<Arc<Path>>;
}

// Allow any closure that matches the signature to be a PathPolicy.
impl<F> PathPolicy for F
where
    F: 'static + Send + Sync + Fn(Vec<Arc<Path>>) -> Vec<Arc<Path>>,
{
    fn filter(&self, paths: Vec<Arc<Path>>) -> Vec<Arc<Path>> {
        (self)(paths)
    }
}

/// Keeps only the paths accepted by the predicate, preserving their order.
pub struct Predicate<F>(pub F);

impl<F> PathPolicy for Predicate<F>
where
    F: 'static + Send + Sync + Fn(&Path) -> bool,
{
    fn filter(&self, mut paths: Vec<Arc<Path>>) -> Vec<Arc<Path>> {
        paths.retain(|p| (self.0)(p));
        paths
    }
}

/// Orders paths by the number of traversed interfaces. The sort is stable.
pub struct Shortest;

impl PathPolicy for Shortest {
    fn filter(&self, mut paths: Vec<Arc<Path>>) -> Vec<Arc<Path>> {
        paths.sort_by_key(|p| p.interface_count());
        paths
    }
}

/// Applies multiple policies in order.
#[derive(Default)]
pub struct PolicySequence {
    policies: Vec<Arc<dyn PathPolicy>>,
}

impl PolicySequence {
    /// Appends a policy.
    pub fn with(mut self, policy: impl PathPolicy) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }
}

impl PathPolicy for PolicySequence {
    fn filter(&self, paths: Vec<Arc<Path>>) -> Vec<Arc<Path>> {
        self.policies
            .iter()
            .fold(paths, |paths, policy| policy.filter(paths))
    }
}

/// Applies the policy if there is one. Without a policy all paths are allowed.
pub fn filtered(policy: Option<&dyn PathPolicy>, paths: Vec<Arc<Path>>) -> Vec<Arc<Path>> {
    match policy {
        Some(policy) => policy.filter(paths),
        None => paths,
    }
}
