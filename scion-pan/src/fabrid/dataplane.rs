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

//! FABRID data plane path.

use std::{fmt, sync::Arc, time::SystemTime};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};

use crate::{
    address::ScionAddr,
    fabrid::{
        FabridError, FabridPathState, FabridPolicyPerHop,
        drkey::{AsHostMeta, ControlPlaneError, DrkeyClient, DrkeyKey, HostHostMeta},
    },
    path::PathInterface,
};

/// Fetches an AS-host key on demand.
pub type AsHostKeyFetcher = Arc<
    dyn Fn(AsHostMeta) -> BoxFuture<'static, Result<DrkeyKey, ControlPlaneError>> + Send + Sync,
>;

/// Fetches a host-host key on demand.
pub type HostHostKeyFetcher = Arc<
    dyn Fn(HostHostMeta) -> BoxFuture<'static, Result<DrkeyKey, ControlPlaneError>> + Send + Sync,
>;

/// A standard SCION path carrying FABRID per-hop policies and validation state.
///
/// The per-hop keys are fetched lazily through the registered fetchers when packets are
/// authenticated.
pub struct FabridDataplanePath {
    raw: Bytes,
    interfaces: Vec<PathInterface>,
    hops: Vec<FabridPolicyPerHop>,
    local: ScionAddr,
    destination: ScionAddr,
    state: Arc<FabridPathState>,
    as_host_fetcher: Option<AsHostKeyFetcher>,
    host_host_fetcher: Option<HostHostKeyFetcher>,
}

impl fmt::Debug for FabridDataplanePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabridDataplanePath")
            .field("raw_len", &self.raw.len())
            .field("hops", &self.hops)
            .field("local", &self.local)
            .field("destination", &self.destination)
            .field("fingerprint", &self.state.fingerprint())
            .field("fetchers_registered", &self.as_host_fetcher.is_some())
            .finish()
    }
}

impl FabridDataplanePath {
    /// Wraps a raw standard path.
    pub fn new(
        raw: Bytes,
        interfaces: Vec<PathInterface>,
        hops: Vec<FabridPolicyPerHop>,
        local: ScionAddr,
        destination: ScionAddr,
        state: Arc<FabridPathState>,
    ) -> Result<Self, FabridError> {
        if raw.is_empty() {
            return Err(FabridError::InvalidPath("empty data plane path".into()));
        }
        if hops.len() != interfaces.len() / 2 + 1 {
            return Err(FabridError::InvalidPath(
                format!(
                    "{} hops do not match {} interfaces",
                    hops.len(),
                    interfaces.len()
                )
                .into(),
            ));
        }
        Ok(Self {
            raw,
            interfaces,
            hops,
            local,
            destination,
            state,
            as_host_fetcher: None,
            host_host_fetcher: None,
        })
    }

    /// Registers the key fetchers.
    pub fn register_drkey_fetchers(
        &mut self,
        as_host: AsHostKeyFetcher,
        host_host: HostHostKeyFetcher,
    ) {
        self.as_host_fetcher = Some(as_host);
        self.host_host_fetcher = Some(host_host);
    }

    /// Registers fetchers backed by a control-plane session.
    pub fn register_drkey_client(&mut self, client: Arc<dyn DrkeyClient>) {
        let as_host_client = client.clone();
        self.register_drkey_fetchers(
            Arc::new(move |meta: AsHostMeta| {
                let client = as_host_client.clone();
                async move { client.as_host_key(meta).await }.boxed()
            }),
            Arc::new(move |meta: HostHostMeta| {
                let client = client.clone();
                async move { client.host_host_key(meta).await }.boxed()
            }),
        );
    }

    /// Returns the raw standard path.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Returns the per-hop policies.
    pub fn hops(&self) -> &[FabridPolicyPerHop] {
        &self.hops
    }

    /// Returns the traversed interfaces.
    pub fn interfaces(&self) -> &[PathInterface] {
        &self.interfaces
    }

    /// Returns the validation state shared with the FABRID client.
    pub fn state(&self) -> &Arc<FabridPathState> {
        &self.state
    }

    /// Fetches the key the AS of hop `index` shares with the local host.
    pub async fn hop_key(
        &self,
        index: usize,
        validity: SystemTime,
    ) -> Result<DrkeyKey, FabridError> {
        let hop = self.hops.get(index).ok_or(FabridError::InvalidHop(index))?;
        let fetcher = self
            .as_host_fetcher
            .as_ref()
            .ok_or(FabridError::MissingKeyFetcher)?;
        let meta = AsHostMeta {
            validity,
            src_ia: hop.isd_asn,
            dst_ia: self.local.isd_asn,
            dst_host: self.local.ip,
        };
        Ok(fetcher(meta).await?)
    }

    /// Fetches the key the local host shares with the destination host.
    pub async fn destination_key(&self, validity: SystemTime) -> Result<DrkeyKey, FabridError> {
        let fetcher = self
            .host_host_fetcher
            .as_ref()
            .ok_or(FabridError::MissingKeyFetcher)?;
        let meta = HostHostMeta {
            validity,
            src_ia: self.local.isd_asn,
            dst_ia: self.destination.isd_asn,
            src_host: self.local.ip,
            dst_host: self.destination.ip,
        };
        Ok(fetcher(meta).await?)
    }
}
