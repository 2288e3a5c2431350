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

//! DRKey control-plane session.
//!
//! FABRID validation needs a symmetric key per on-path AS and one shared with the destination
//! host. Both are derived by the control service of the local AS and fetched on demand.

use std::{borrow::Cow, net::IpAddr, sync::Arc, time::SystemTime};

use futures::future::BoxFuture;

use crate::address::IsdAsn;

/// Describes a key between an AS and a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsHostMeta {
    /// Point in time the key must be valid at.
    pub validity: SystemTime,
    /// The AS deriving the key.
    pub src_ia: IsdAsn,
    /// The AS of the host.
    pub dst_ia: IsdAsn,
    /// The host.
    pub dst_host: IpAddr,
}

/// Describes a key between two hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostHostMeta {
    /// Point in time the key must be valid at.
    pub validity: SystemTime,
    /// The AS of the first host.
    pub src_ia: IsdAsn,
    /// The AS of the second host.
    pub dst_ia: IsdAsn,
    /// The first host.
    pub src_host: IpAddr,
    /// The second host.
    pub dst_host: IpAddr,
}

/// Key material returned by the control service.
#[derive(Clone, PartialEq, Eq)]
pub struct DrkeyKey {
    /// Start of the validity period.
    pub not_before: SystemTime,
    /// End of the validity period.
    pub not_after: SystemTime,
    /// The key.
    pub key: [u8; 16],
}

impl std::fmt::Debug for DrkeyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrkeyKey")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// A session to the control service of the local AS.
pub trait DrkeyClient: Send + Sync {
    /// Fetches an AS-host key.
    fn as_host_key(&self, meta: AsHostMeta) -> BoxFuture<'_, Result<DrkeyKey, ControlPlaneError>>;

    /// Fetches a host-host key.
    fn host_host_key(
        &self,
        meta: HostHostMeta,
    ) -> BoxFuture<'_, Result<DrkeyKey, ControlPlaneError>>;
}

/// Opens sessions to the control service of the local AS.
pub trait ControlPlaneConnector: Send + Sync {
    /// Opens a session originating from `local`.
    ///
    /// Must not block: connection establishment is deferred to the first request.
    fn connect(&self, local: IpAddr) -> Result<Arc<dyn DrkeyClient>, ControlPlaneError>;
}

/// Control-plane errors.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// No control service is known for the local AS.
    #[error("control service unavailable: {0}")]
    ServiceUnavailable(Cow<'static, str>),
    /// The session could not be established.
    #[error("failed to connect to control service: {0}")]
    Connect(Cow<'static, str>),
    /// A key request failed.
    #[error("key request failed: {0}")]
    Request(Cow<'static, str>),
}
