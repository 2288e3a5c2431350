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

//! Dialed connections.

use std::{fmt, sync::Arc};

use bytes::Bytes;

use crate::{
    address::UdpAddr,
    fabrid::{FabridClient, FabridError},
    path::{Path, policy::PathPolicy, subscriber::PathRefreshSubscriber},
    selector::Selector,
    stack::{
        ReceiveError, SendError,
        transport::{ExtensionOption, PacketConn, ReceivedMessage, TransportError},
    },
};

/// A connection to a single remote.
///
/// Packets are sent along the path chosen by the selector. Packets from other sources are
/// dropped.
pub struct DialedConn {
    conn: Arc<dyn PacketConn>,
    local: UdpAddr,
    remote: UdpAddr,
    subscriber: Option<Arc<PathRefreshSubscriber>>,
    selector: Arc<dyn Selector>,
}

impl fmt::Debug for DialedConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialedConn")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("subscriber", &self.subscriber.is_some())
            .finish_non_exhaustive()
    }
}

impl DialedConn {
    pub(crate) fn new(
        conn: Arc<dyn PacketConn>,
        remote: UdpAddr,
        subscriber: Option<Arc<PathRefreshSubscriber>>,
        selector: Arc<dyn Selector>,
    ) -> Self {
        Self {
            local: conn.local_addr(),
            conn,
            remote,
            subscriber,
            selector,
        }
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> UdpAddr {
        self.local
    }

    /// Returns the remote address.
    pub fn remote_addr(&self) -> UdpAddr {
        self.remote
    }

    /// Replaces the path policy. Has no effect on connections within the local AS.
    pub fn set_policy(&self, policy: Option<Arc<dyn PathPolicy>>) {
        if let Some(subscriber) = &self.subscriber {
            subscriber.set_policy(policy);
        }
    }

    /// Returns the path the next packet would be sent on.
    pub fn path(&self) -> Option<Arc<Path>> {
        self.selector.path()
    }

    /// Sends `payload` along the selected path.
    pub async fn write(&self, payload: &[u8]) -> Result<usize, SendError> {
        let path = self.select_path()?;
        self.write_msg(path, payload, Vec::new()).await
    }

    /// Sends `payload` along `path`, bypassing the selector.
    pub async fn write_via(
        &self,
        path: Option<Arc<Path>>,
        payload: &[u8],
    ) -> Result<usize, SendError> {
        self.write_msg(path, payload, Vec::new()).await
    }

    /// Receives the next packet from the remote into `buffer`.
    ///
    /// Returns the payload length. A payload larger than the buffer is truncated.
    pub async fn read(&self, buffer: &mut [u8]) -> Result<usize, ReceiveError> {
        let msg = self.recv_from_remote().await?;
        Ok(copy_payload(&msg.payload, buffer))
    }

    /// Like [`DialedConn::read`], but also returns the path leading back to the remote.
    ///
    /// Packets whose path cannot be reversed are dropped.
    pub async fn read_via(&self, buffer: &mut [u8]) -> Result<(usize, Arc<Path>), ReceiveError> {
        loop {
            let msg = self.recv_from_remote().await?;
            let Some(path) = msg.path else {
                tracing::debug!(remote = %self.remote, "Dropping packet with unreversible path");
                continue;
            };
            return Ok((copy_payload(&msg.payload, buffer), path));
        }
    }

    /// Closes the connection.
    ///
    /// Cancels the path subscription and closes the selector and the socket.
    pub fn close(&self) -> Result<(), TransportError> {
        if let Some(subscriber) = &self.subscriber {
            subscriber.close();
        }
        if let Err(e) = self.selector.close() {
            tracing::warn!(error = %e, "Failed to close selector");
        }
        self.conn.close()
    }

    fn select_path(&self) -> Result<Option<Arc<Path>>, SendError> {
        if self.local.isd_asn == self.remote.isd_asn {
            return Ok(None);
        }
        match self.selector.path() {
            Some(path) => Ok(Some(path)),
            None => Err(SendError::NoPath(self.remote.isd_asn)),
        }
    }

    async fn write_msg(
        &self,
        path: Option<Arc<Path>>,
        payload: &[u8],
        extensions: Vec<ExtensionOption>,
    ) -> Result<usize, SendError> {
        Ok(self
            .conn
            .write_msg(
                self.remote,
                path,
                Bytes::copy_from_slice(payload),
                extensions,
            )
            .await?)
    }

    async fn recv_from_remote(&self) -> Result<ReceivedMessage, ReceiveError> {
        loop {
            let msg = self.conn.read_msg().await?;
            if msg.source != self.remote {
                tracing::trace!(source = %msg.source, "Dropping packet from unexpected source");
                continue;
            }
            return Ok(msg);
        }
    }
}

/// A dialed connection using FABRID paths.
///
/// Outgoing packets carry the pending control options of their path, incoming control options
/// are applied to the [FabridClient].
pub struct FabridDialedConn {
    inner: DialedConn,
    client: Arc<FabridClient>,
}

impl fmt::Debug for FabridDialedConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabridDialedConn")
            .field("inner", &self.inner)
            .field("client", &self.client)
            .finish()
    }
}

impl FabridDialedConn {
    pub(crate) fn new(inner: DialedConn, client: Arc<FabridClient>) -> Self {
        Self { inner, client }
    }

    /// Returns the plain connection.
    pub fn as_dialed(&self) -> &DialedConn {
        &self.inner
    }

    /// Returns the FABRID client.
    pub fn client(&self) -> &Arc<FabridClient> {
        &self.client
    }

    /// Sends `payload` along the selected path together with its pending control options.
    pub async fn write(&self, payload: &[u8]) -> Result<usize, SendError> {
        let path = self.inner.select_path()?;
        let extensions = match &path {
            Some(path) if path.forwarding.dataplane.is_fabrid() => self
                .client
                .pending_options(path.fingerprint())
                .into_iter()
                .map(ExtensionOption::FabridControl)
                .collect(),
            _ => Vec::new(),
        };
        self.inner.write_msg(path, payload, extensions).await
    }

    /// Receives the next packet from the remote into `buffer`.
    ///
    /// FABRID control options are handed to the client. Packets that carry only control options
    /// are not returned.
    pub async fn read(&self, buffer: &mut [u8]) -> Result<usize, ReceiveError> {
        loop {
            let msg = self.inner.recv_from_remote().await?;
            let options: Vec<_> = msg
                .extensions
                .iter()
                .filter_map(|o| {
                    match o {
                        ExtensionOption::FabridControl(option) => Some(*option),
                        ExtensionOption::Other { .. } => None,
                    }
                })
                .collect();
            if options.is_empty() {
                return Ok(copy_payload(&msg.payload, buffer));
            }

            match &msg.path {
                Some(path) => self.handle_control_options(path, options)?,
                None => {
                    tracing::debug!("Dropping control options of packet with unreversible path");
                }
            }
            if !msg.payload.is_empty() {
                return Ok(copy_payload(&msg.payload, buffer));
            }
        }
    }

    /// Closes the connection.
    pub fn close(&self) -> Result<(), TransportError> {
        self.inner.close()
    }

    fn handle_control_options(
        &self,
        path: &Path,
        options: Vec<crate::fabrid::FabridControlOption>,
    ) -> Result<(), ReceiveError> {
        let fingerprint = path.fingerprint();
        for option in options {
            match self.client.handle_control_option(fingerprint, option) {
                Ok(()) => {}
                Err(e @ FabridError::Validation(_)) => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(%fingerprint, error = %e, "Dropping control option");
                }
            }
        }
        Ok(())
    }
}

fn copy_payload(payload: &[u8], buffer: &mut [u8]) -> usize {
    let len = payload.len().min(buffer.len());
    buffer[..len].copy_from_slice(&payload[..len]);
    len
}
