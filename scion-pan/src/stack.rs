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

//! # Path-aware connections.
//!
//! [PanStack] is instantiated once per process. It holds the shared path pool, the liveness and
//! latency registry and the packet transport, and opens connections on top of them.
//!
//! ## Dialing
//!
//! [`PanStack::dial_udp`] returns a [DialedConn] whose packets follow the path chosen by a
//! [Selector]. Connections to another AS subscribe to the paths of the remote AS in the pool;
//! connections within the local AS send without a path.
//!
//! ## Listening
//!
//! [`PanStack::listen_udp`] returns a [ListenConn] which replies along the paths its remotes
//! used, as chosen by a [ReplySelector].

use std::{fmt, sync::Arc};

use crate::{
    address::{IsdAsn, SocketAddr, UdpAddr},
    fabrid::{ControlPlaneConnector, FabridClient, FabridConfig, FabridError},
    path::{
        policy::PathPolicy,
        pool::{PathPool, PathPoolError, PoolRefresherTask},
        stats::PathStats,
        subscriber::PathRefreshSubscriber,
    },
    selector::{DefaultReplySelector, DefaultSelector, FabridSelector, ReplySelector, Selector},
    stack::transport::{PacketConn, PacketConnOpener, TransportError},
};

pub mod builder;
pub mod dial;
pub mod listen;
pub mod transport;

pub use builder::PanStackBuilder;
pub use dial::{DialedConn, FabridDialedConn};
pub use listen::ListenConn;

/// Opens path-aware connections.
pub struct PanStack {
    pool: Arc<dyn PathPool>,
    stats: Arc<dyn PathStats>,
    transport: Arc<dyn PacketConnOpener>,
    control_plane: Option<Arc<dyn ControlPlaneConnector>>,
    _refresher: Option<PoolRefresherTask>,
}

impl fmt::Debug for PanStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanStack")
            .field("pool", &"Arc<dyn PathPool>")
            .field("stats", &"Arc<dyn PathStats>")
            .field("transport", &"Arc<dyn PacketConnOpener>")
            .field("control_plane", &self.control_plane.is_some())
            .finish()
    }
}

impl PanStack {
    pub(crate) fn new(
        pool: Arc<dyn PathPool>,
        stats: Arc<dyn PathStats>,
        transport: Arc<dyn PacketConnOpener>,
        control_plane: Option<Arc<dyn ControlPlaneConnector>>,
        refresher: Option<PoolRefresherTask>,
    ) -> Self {
        Self {
            pool,
            stats,
            transport,
            control_plane,
            _refresher: refresher,
        }
    }

    /// Returns the liveness and latency registry, e.g. to create a
    /// [PingingSelector](crate::selector::PingingSelector).
    pub fn stats(&self) -> &Arc<dyn PathStats> {
        &self.stats
    }

    /// Returns the path pool.
    pub fn pool(&self) -> &Arc<dyn PathPool> {
        &self.pool
    }

    /// Opens a connection to `remote`.
    ///
    /// # Arguments
    /// * `local` - The address to bind to. If None, the transport chooses one.
    /// * `remote` - The remote SCION address.
    /// * `policy` - Filters and orders the paths to the remote.
    /// * `selector` - Chooses the path of each packet. Defaults to a [DefaultSelector].
    pub async fn dial_udp(
        &self,
        local: Option<std::net::SocketAddr>,
        remote: SocketAddr,
        policy: Option<Arc<dyn PathPolicy>>,
        selector: Option<Arc<dyn Selector>>,
    ) -> Result<DialedConn, DialError> {
        let SocketAddr::Scion(remote) = remote else {
            return Err(DialError::BadDestinationAddress(remote));
        };
        let selector =
            selector.unwrap_or_else(|| Arc::new(DefaultSelector::new(self.stats.clone())));
        let conn = self.transport.open(local).await?;
        self.connect(conn, remote, policy, selector).await
    }

    /// Opens a connection to `remote` using FABRID paths.
    ///
    /// Returns the connection and the FABRID client holding the per-path validation state.
    /// FABRID is not used within the local AS.
    pub async fn dial_udp_with_fabrid(
        &self,
        local: Option<std::net::SocketAddr>,
        remote: SocketAddr,
        policy: Option<Arc<dyn PathPolicy>>,
        config: FabridConfig,
    ) -> Result<(FabridDialedConn, Arc<FabridClient>), DialError> {
        let SocketAddr::Scion(remote_addr) = remote else {
            return Err(DialError::BadDestinationAddress(remote));
        };
        let connector = self
            .control_plane
            .clone()
            .ok_or(DialError::ControlPlaneUnavailable)?;
        let conn = self.transport.open(local).await?;
        let local = conn.local_addr();
        let client = Arc::new(FabridClient::new(
            local.scion_addr(),
            remote_addr.scion_addr(),
            config,
        ));
        let selector: Arc<dyn Selector> = Arc::new(FabridSelector::new(
            client.clone(),
            connector,
            self.stats.clone(),
        ));
        if local.isd_asn == remote_addr.isd_asn {
            tracing::info!(%remote_addr, "Not using FABRID for local traffic");
        }
        let inner = self.connect(conn, remote_addr, policy, selector).await?;
        Ok((FabridDialedConn::new(inner, client.clone()), client))
    }

    /// Opens a listening connection.
    ///
    /// # Arguments
    /// * `local` - The address to bind to. If None, the transport chooses one.
    /// * `selector` - Chooses reply paths. Defaults to a [DefaultReplySelector].
    pub async fn listen_udp(
        &self,
        local: Option<std::net::SocketAddr>,
        selector: Option<Arc<dyn ReplySelector>>,
    ) -> Result<ListenConn, ListenError> {
        let selector = selector.unwrap_or_else(|| Arc::new(DefaultReplySelector::default()));
        let conn = self.transport.open(local).await?;
        let listen = ListenConn::new(conn, selector, self.stats.clone());
        tracing::debug!(local = %listen.local_addr(), "Listening");
        Ok(listen)
    }

    async fn connect(
        &self,
        conn: Arc<dyn PacketConn>,
        remote: UdpAddr,
        policy: Option<Arc<dyn PathPolicy>>,
        selector: Arc<dyn Selector>,
    ) -> Result<DialedConn, DialError> {
        let local = conn.local_addr();
        let subscriber = if local.isd_asn != remote.isd_asn {
            match PathRefreshSubscriber::open(
                self.pool.clone(),
                local,
                remote,
                policy,
                selector.clone(),
            )
            .await
            {
                Ok(subscriber) => Some(subscriber),
                Err(e) => {
                    if let Err(e) = conn.close() {
                        tracing::debug!(error = %e, "Failed to close socket");
                    }
                    return Err(e.into());
                }
            }
        } else {
            None
        };
        tracing::debug!(%local, %remote, "Dialed");
        Ok(DialedConn::new(conn, remote, subscriber, selector))
    }
}

/// Dial errors.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// The remote is not a SCION address.
    #[error("destination {0} is not a SCION/UDP address")]
    BadDestinationAddress(SocketAddr),
    /// The socket could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The paths to the remote could not be fetched.
    #[error(transparent)]
    Paths(#[from] PathPoolError),
    /// FABRID was requested but the stack has no control-plane connector.
    #[error("no control plane connector configured")]
    ControlPlaneUnavailable,
}

/// Listen errors.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    /// The socket could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Send errors.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No path to the destination AS is known.
    #[error("no path to {0}")]
    NoPath(IsdAsn),
    /// The destination is not a SCION address.
    #[error("destination {0} is not a SCION/UDP address")]
    BadDestinationAddress(SocketAddr),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Receive errors.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A FABRID validation result was rejected.
    #[error(transparent)]
    Fabrid(#[from] FabridError),
}
