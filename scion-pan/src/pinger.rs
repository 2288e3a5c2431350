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

//! Echo probing.
//!
//! The [Pinger] is the external transport for SCMP echo requests. The [engine] drives periodic
//! probing rounds over a pinger and feeds the measured round trip times into the liveness and
//! latency registry.

use std::{borrow::Cow, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::{
    address::{IsdAsn, ScionAddr, UdpAddr},
    path::{Path, PathFingerprint, PathInterface},
};

pub mod engine;
#[cfg(test)]
pub(crate) mod test_util;

/// A reply to an echo request, as delivered by the [Pinger].
#[derive(Debug, Clone)]
pub struct PingReply {
    /// The host that sent the reply.
    pub source: ScionAddr,
    /// Sequence number copied from the request.
    pub sequence_number: u16,
    /// Fingerprint of the path the request was sent on, computed from the reversed reply path.
    /// `None` if the reply path could not be reversed.
    pub path_fingerprint: Option<PathFingerprint>,
    /// Measured round trip time.
    pub rtt: Duration,
    /// Set if a router answered with an error instead of the remote echoing the request.
    pub error: Option<PingReplyError>,
}

/// Error replies to an echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingReplyError {
    /// Connectivity between two interfaces of an AS is down.
    InternalConnectivityDown {
        /// The reporting AS.
        isd_asn: IsdAsn,
        /// Ingress interface.
        ingress: u16,
        /// Egress interface.
        egress: u16,
    },
    /// An external interface of an AS is down.
    ExternalInterfaceDown {
        /// The reporting AS.
        isd_asn: IsdAsn,
        /// The interface that is down.
        interface: u16,
    },
    /// Any other error.
    Other(String),
}

impl PingReplyError {
    /// Returns the interface a liveness error reports as down.
    pub fn down_interface(&self) -> Option<PathInterface> {
        match self {
            PingReplyError::InternalConnectivityDown {
                isd_asn, egress, ..
            } => Some(PathInterface::new(*isd_asn, *egress)),
            PingReplyError::ExternalInterfaceDown { isd_asn, interface } => {
                Some(PathInterface::new(*isd_asn, *interface))
            }
            PingReplyError::Other(_) => None,
        }
    }
}

/// Sends echo requests. Replies are delivered through the channel returned by
/// [`PingerFactory::open`].
pub trait Pinger: Send + Sync {
    /// Sends an echo request to `remote` along `path`.
    fn send_echo(
        &self,
        remote: ScionAddr,
        path: Arc<Path>,
        sequence_number: u16,
        payload_size: usize,
    ) -> BoxFuture<'_, Result<(), PingError>>;

    /// Closes the pinger. The reply channel is closed afterwards.
    fn close(&self) -> Result<(), PingError>;
}

/// Opens pingers.
pub trait PingerFactory: Send + Sync {
    /// Opens a pinger bound to `local`.
    fn open(
        &self,
        local: UdpAddr,
    ) -> Result<(Arc<dyn Pinger>, mpsc::Receiver<PingReply>), PingError>;
}

/// Pinger errors.
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    /// The pinger could not be opened.
    #[error("failed to open pinger: {0}")]
    Open(Cow<'static, str>),
    /// An echo request could not be sent.
    #[error("failed to send echo request: {0}")]
    Send(Cow<'static, str>),
    /// The pinger is closed.
    #[error("pinger is closed")]
    Closed,
}
