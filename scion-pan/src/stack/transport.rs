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

//! Packet transport underneath the connections.
//!
//! A [PacketConn] sends and receives SCION/UDP packets along explicit paths. It handles the wire
//! format, including the end-to-end extension header, and reverses the path of received packets.

use std::{borrow::Cow, sync::Arc};

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{address::UdpAddr, fabrid::FabridControlOption, path::Path};

/// An option of the end-to-end extension header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionOption {
    /// A FABRID control option.
    FabridControl(FabridControlOption),
    /// Any other option, undecoded.
    Other {
        /// The option type.
        option_type: u8,
        /// The option data.
        data: Bytes,
    },
}

/// A received packet.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// The UDP payload.
    pub payload: Bytes,
    /// The sender.
    pub source: UdpAddr,
    /// The path the packet arrived on, reversed to lead back to the sender. `None` if the path
    /// could not be reversed.
    pub path: Option<Arc<Path>>,
    /// The options of the end-to-end extension header.
    pub extensions: Vec<ExtensionOption>,
}

/// A bound packet socket.
pub trait PacketConn: Send + Sync {
    /// Returns the address the socket is bound to.
    fn local_addr(&self) -> UdpAddr;

    /// Receives the next packet.
    fn read_msg(&self) -> BoxFuture<'_, Result<ReceivedMessage, TransportError>>;

    /// Sends a packet to `destination`. A `None` path is only valid within the local AS.
    ///
    /// Returns the number of payload bytes written.
    fn write_msg(
        &self,
        destination: UdpAddr,
        path: Option<Arc<Path>>,
        payload: Bytes,
        extensions: Vec<ExtensionOption>,
    ) -> BoxFuture<'_, Result<usize, TransportError>>;

    /// Closes the socket. Pending and later reads return [`TransportError::Closed`].
    fn close(&self) -> Result<(), TransportError>;
}

/// Opens packet sockets.
pub trait PacketConnOpener: Send + Sync {
    /// Binds a socket to `local`. A `None` address lets the transport choose.
    fn open(
        &self,
        local: Option<std::net::SocketAddr>,
    ) -> BoxFuture<'_, Result<Arc<dyn PacketConn>, TransportError>>;
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be bound.
    #[error("failed to bind socket: {0}")]
    Bind(Cow<'static, str>),
    /// The socket is closed.
    #[error("socket is closed")]
    Closed,
    /// I/O error.
    #[error("i/o error: {0:?}")]
    IoError(#[from] std::io::Error),
}
