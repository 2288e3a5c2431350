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

//! Paths and the services that provide them.
//!
//! - [Path] and [PathFingerprint] are the data model shared by all components.
//! - [pool] caches the paths per destination and notifies subscribers of changes.
//! - [stats] is the process-wide liveness and latency registry.
//! - [subscriber] feeds the paths of one destination into a selector.

mod types;

pub mod fetcher;
pub mod policy;
pub mod pool;
pub mod stats;
pub mod subscriber;
pub mod test_builder;

pub use types::{DataplanePath, ForwardingPath, Path, PathFingerprint, PathInterface};
