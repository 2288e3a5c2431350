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

//! In-memory pinger for tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::mpsc;

use crate::{
    address::{ScionAddr, UdpAddr},
    path::{Path, PathFingerprint},
    pinger::{PingError, PingReply, Pinger, PingerFactory},
};

/// Records the echo requests it is asked to send.
#[derive(Default)]
pub struct FakePinger {
    sent: Mutex<Vec<(PathFingerprint, u16)>>,
    closed: AtomicBool,
}

impl FakePinger {
    /// Returns the pinger and both ends of its reply channel.
    pub fn new() -> (
        Arc<Self>,
        mpsc::Sender<PingReply>,
        mpsc::Receiver<PingReply>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Self::default()), tx, rx)
    }

    /// The (path, sequence number) pairs sent so far.
    pub fn sent(&self) -> Vec<(PathFingerprint, u16)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Pinger for FakePinger {
    fn send_echo(
        &self,
        _remote: ScionAddr,
        path: Arc<Path>,
        sequence_number: u16,
        _payload_size: usize,
    ) -> BoxFuture<'_, Result<(), PingError>> {
        async move {
            if self.is_closed() {
                return Err(PingError::Closed);
            }
            self.sent
                .lock()
                .unwrap()
                .push((path.fingerprint(), sequence_number));
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> Result<(), PingError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one [`FakePinger`] per open call and keeps the reply senders.
#[derive(Default)]
pub struct FakePingerFactory {
    pub opened: AtomicUsize,
    pub pingers: Mutex<Vec<(Arc<FakePinger>, mpsc::Sender<PingReply>)>>,
    pub fail: AtomicBool,
}

impl PingerFactory for FakePingerFactory {
    fn open(
        &self,
        _local: UdpAddr,
    ) -> Result<(Arc<dyn Pinger>, mpsc::Receiver<PingReply>), PingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PingError::Open("no socket".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (pinger, tx, rx) = FakePinger::new();
        self.pingers.lock().unwrap().push((pinger.clone(), tx));
        Ok((pinger, rx))
    }
}
