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

//! Listening connections.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    address::{SocketAddr, UdpAddr},
    path::{
        Path,
        stats::{PathDownReceiver, PathStats},
    },
    selector::ReplySelector,
    stack::{
        ReceiveError, SendError,
        transport::{PacketConn, TransportError},
    },
};

/// A connection accepting packets from any remote.
///
/// Replies are sent along the path chosen by the [ReplySelector], which learns the paths of
/// received packets. The selector receives the down notifications of the registry while the
/// connection is open.
pub struct ListenConn {
    conn: Arc<dyn PacketConn>,
    local: UdpAddr,
    selector: Arc<dyn ReplySelector>,
    stats: Arc<dyn PathStats>,
}

impl ListenConn {
    pub(crate) fn new(
        conn: Arc<dyn PacketConn>,
        selector: Arc<dyn ReplySelector>,
        stats: Arc<dyn PathStats>,
    ) -> Self {
        let local = conn.local_addr();
        selector.initialize(local);
        stats.subscribe(selector.clone());
        Self {
            conn,
            local,
            selector,
            stats,
        }
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> UdpAddr {
        self.local
    }

    /// Receives the next packet into `buffer`.
    ///
    /// Returns the payload length and the sender. A payload larger than the buffer is truncated.
    pub async fn read_from(&self, buffer: &mut [u8]) -> Result<(usize, UdpAddr), ReceiveError> {
        let (len, source, _) = self.read_from_via(buffer).await?;
        Ok((len, source))
    }

    /// Like [`ListenConn::read_from`], but also returns the path leading back to the sender, if
    /// it could be reversed.
    pub async fn read_from_via(
        &self,
        buffer: &mut [u8],
    ) -> Result<(usize, UdpAddr, Option<Arc<Path>>), ReceiveError> {
        let msg = self.conn.read_msg().await?;
        self.selector.record(msg.source, msg.path.clone());
        let len = msg.payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&msg.payload[..len]);
        Ok((len, msg.source, msg.path))
    }

    /// Sends `payload` to `destination` along the path chosen by the reply selector.
    pub async fn write_to(
        &self,
        payload: &[u8],
        destination: SocketAddr,
    ) -> Result<usize, SendError> {
        let SocketAddr::Scion(destination) = destination else {
            return Err(SendError::BadDestinationAddress(destination));
        };
        let path = if self.local.isd_asn == destination.isd_asn {
            None
        } else {
            Some(
                self.selector
                    .path(destination)
                    .ok_or(SendError::NoPath(destination.isd_asn))?,
            )
        };
        self.write_to_via(payload, destination, path).await
    }

    /// Sends `payload` to `destination` along `path`.
    pub async fn write_to_via(
        &self,
        payload: &[u8],
        destination: UdpAddr,
        path: Option<Arc<Path>>,
    ) -> Result<usize, SendError> {
        Ok(self
            .conn
            .write_msg(
                destination,
                path,
                Bytes::copy_from_slice(payload),
                Vec::new(),
            )
            .await?)
    }

    /// Closes the connection.
    ///
    /// Unsubscribes the reply selector from down notifications and closes it and the socket.
    pub fn close(&self) -> Result<(), TransportError> {
        let receiver: Arc<dyn PathDownReceiver> = self.selector.clone();
        self.stats.unsubscribe(&receiver);
        if let Err(e) = self.selector.close() {
            tracing::warn!(error = %e, "Failed to close reply selector");
        }
        self.conn.close()
    }
}
