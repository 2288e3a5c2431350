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

//! In-memory control plane for tests.

use std::{
    net::IpAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, UNIX_EPOCH},
};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    address::IsdAsn,
    fabrid::drkey::{
        AsHostMeta, ControlPlaneConnector, ControlPlaneError, DrkeyClient, DrkeyKey, HostHostMeta,
    },
};

/// Hands out keys derived from the requested metadata and records the requests.
#[derive(Default)]
pub struct FakeDrkeyClient {
    pub as_host: Mutex<Vec<AsHostMeta>>,
    pub host_host: Mutex<Vec<HostHostMeta>>,
}

impl FakeDrkeyClient {
    /// The AS-host key handed out for keys derived by `src_ia`.
    pub fn as_host_key_for(src_ia: IsdAsn) -> DrkeyKey {
        key(src_ia.asn().0 as u8)
    }

    /// The host-host key handed out for every request.
    pub fn host_host_key() -> DrkeyKey {
        key(0xff)
    }
}

impl DrkeyClient for FakeDrkeyClient {
    fn as_host_key(&self, meta: AsHostMeta) -> BoxFuture<'_, Result<DrkeyKey, ControlPlaneError>> {
        self.as_host.lock().unwrap().push(meta);
        async move { Ok(Self::as_host_key_for(meta.src_ia)) }.boxed()
    }

    fn host_host_key(
        &self,
        meta: HostHostMeta,
    ) -> BoxFuture<'_, Result<DrkeyKey, ControlPlaneError>> {
        self.host_host.lock().unwrap().push(meta);
        async move { Ok(Self::host_host_key()) }.boxed()
    }
}

fn key(b: u8) -> DrkeyKey {
    DrkeyKey {
        not_before: UNIX_EPOCH,
        not_after: UNIX_EPOCH + Duration::from_secs(3600),
        key: [b; 16],
    }
}

/// Connects to a shared [FakeDrkeyClient], or fails if configured so.
#[derive(Default)]
pub struct FakeConnector {
    pub session: Arc<FakeDrkeyClient>,
    pub fail: bool,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ControlPlaneConnector for FakeConnector {
    fn connect(&self, _local: IpAddr) -> Result<Arc<dyn DrkeyClient>, ControlPlaneError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ControlPlaneError::ServiceUnavailable(
                "no control service".into(),
            ));
        }
        Ok(self.session.clone())
    }
}
