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

//! FABRID path validation.
//!
//! FABRID lets the source choose a forwarding policy per on-path AS and lets both endpoints
//! validate that the packets actually traversed the chosen hops. This module holds the state the
//! endhost needs for that:
//! - [hops] derives the per-hop policy annotations of a path.
//! - [drkey] is the control-plane session used to fetch per-hop keys.
//! - [dataplane] wraps a standard path with the per-hop validation state.
//! - [client] tracks the per-path validation state negotiated with the destination.
//!
//! Packet authentication itself happens below this crate.

use std::borrow::Cow;

use crate::path::PathFingerprint;

pub mod client;
pub mod dataplane;
pub mod drkey;
pub mod hops;
#[cfg(test)]
pub(crate) mod test_util;

pub use client::{FabridClient, FabridConfig, FabridControlOption, FabridPathState, PathState};
pub use dataplane::FabridDataplanePath;
pub use drkey::{ControlPlaneConnector, ControlPlaneError, DrkeyClient};
pub use hops::{FabridPolicy, FabridPolicyPerHop, hops_for_path};

/// FABRID errors.
#[derive(Debug, thiserror::Error)]
pub enum FabridError {
    /// The path cannot carry FABRID state.
    #[error("invalid path for FABRID: {0}")]
    InvalidPath(Cow<'static, str>),
    /// No key fetchers were registered on the path.
    #[error("no DRKey fetchers registered")]
    MissingKeyFetcher,
    /// The hop index is out of range.
    #[error("no hop with index {0}")]
    InvalidHop(usize),
    /// The control-plane session failed.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    /// A control option for a path without FABRID state was received.
    #[error("no FABRID state for path {0}")]
    UnknownPath(PathFingerprint),
    /// A control option only the destination handles was received.
    #[error("unexpected control option: {0}")]
    UnexpectedControlOption(&'static str),
    /// The validation handler rejected a validation result.
    #[error("validation failed: {0}")]
    Validation(Cow<'static, str>),
}
