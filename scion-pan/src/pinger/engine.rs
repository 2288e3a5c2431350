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

//! Active probing engine.
//!
//! The engine runs probing rounds. Each tick of the probe interval starts a round that sends one
//! echo request along each of the first candidates of its [ProbeTargets]. A round ends when every
//! probed path has replied or when the round timeout fires, whichever comes first. Replies are
//! recorded as latency samples, paths that did not reply in time are recorded with the timeout as
//! latency. At the end of a round the targets are told to reselect.
//!
//! At most one round is outstanding at any time.

use std::{collections::HashSet, sync::Arc};

use anyhow::Context;
use tokio::{
    select,
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    address::ScionAddr,
    path::{Path, PathFingerprint, stats::PathStats},
    pinger::{PingReply, PingReplyError, Pinger},
    selector::PingingSelectorConfig,
};

/// The paths probed by an engine.
pub trait ProbeTargets: Send + Sync {
    /// Returns the paths to probe in the next round, most preferred first.
    fn probe_candidates(&self) -> Vec<Arc<Path>>;

    /// Called after each completed round, once the new samples are recorded.
    fn probes_completed(&self);
}

#[derive(Debug)]
enum Round {
    Idle,
    Awaiting {
        sequence_number: u16,
        pending: HashSet<PathFingerprint>,
        deadline: Instant,
    },
}

impl Round {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Round::Idle => None,
            Round::Awaiting { deadline, .. } => Some(*deadline),
        }
    }
}

/// Probing loop for the paths to one remote host.
pub struct ProbingEngine {
    remote: ScionAddr,
    config: PingingSelectorConfig,
    pinger: Arc<dyn Pinger>,
    replies: mpsc::Receiver<PingReply>,
    stats: Arc<dyn PathStats>,
    targets: Arc<dyn ProbeTargets>,
    round: Round,
    sequence_number: u16,
}

impl ProbingEngine {
    /// Creates a new engine. Nothing happens until [`ProbingEngine::run`] is awaited.
    pub fn new(
        remote: ScionAddr,
        config: PingingSelectorConfig,
        pinger: Arc<dyn Pinger>,
        replies: mpsc::Receiver<PingReply>,
        stats: Arc<dyn PathStats>,
        targets: Arc<dyn ProbeTargets>,
    ) -> Self {
        Self {
            remote,
            config,
            pinger,
            replies,
            stats,
            targets,
            round: Round::Idle,
            sequence_number: 0,
        }
    }

    /// Runs the probing loop until cancelled or until the pinger closes its reply channel.
    ///
    /// Returns the exit reason.
    pub async fn run(mut self, cancel_token: CancellationToken) -> &'static str {
        let interval = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.round.deadline();
            select! {
                biased;
                _ = cancel_token.cancelled() => return "cancelled",
                // Timeouts go first, a round is closed before the next one starts.
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.close_timed_out_round();
                }
                reply = self.replies.recv() => {
                    let Some(reply) = reply else {
                        return "pinger closed";
                    };
                    self.handle_reply(reply);
                }
                _ = ticker.tick() => {
                    self.start_round().await;
                }
            }
        }
    }

    async fn start_round(&mut self) {
        if matches!(self.round, Round::Awaiting { .. }) {
            tracing::debug!("Previous probing round still outstanding, closing it");
            self.close_timed_out_round();
        }

        let mut pending = HashSet::new();
        let candidates: Vec<_> = self
            .targets
            .probe_candidates()
            .into_iter()
            .filter(|p| pending.insert(p.fingerprint()))
            .collect();
        if candidates.is_empty() {
            return;
        }

        self.sequence_number = self.sequence_number.wrapping_add(1);
        let sequence_number = self.sequence_number;
        tracing::trace!(sequence_number, count = candidates.len(), "Starting probing round");

        for path in candidates {
            let fingerprint = path.fingerprint();
            // A failed send leaves the path pending, it ends up with a timeout sample.
            if let Err(e) = self
                .pinger
                .send_echo(self.remote, path, sequence_number, self.config.payload_size)
                .await
            {
                tracing::warn!(%fingerprint, error = %e, "Failed to send probe");
            }
        }

        self.round = Round::Awaiting {
            sequence_number,
            pending,
            deadline: Instant::now() + self.config.timeout,
        };
    }

    fn handle_reply(&mut self, reply: PingReply) {
        if let Some(error) = &reply.error {
            if let Err(e) = self.notify_down(&reply, error) {
                tracing::debug!(error = %e, "Ignoring error reply");
            }
            return;
        }

        if reply.source != self.remote {
            tracing::trace!(source = %reply.source, "Dropping reply from unexpected source");
            return;
        }
        let Round::Awaiting {
            sequence_number,
            pending,
            ..
        } = &mut self.round
        else {
            tracing::trace!(
                sequence_number = reply.sequence_number,
                "Dropping reply outside of a round"
            );
            return;
        };
        if reply.sequence_number != *sequence_number {
            tracing::trace!(sequence_number = reply.sequence_number, "Dropping stale reply");
            return;
        }
        let Some(fingerprint) = reply.path_fingerprint else {
            return;
        };
        if !pending.remove(&fingerprint) {
            tracing::trace!(%fingerprint, "Dropping reply for path not probed in this round");
            return;
        }

        self.stats.record_latency(self.remote, fingerprint, reply.rtt);
        if pending.is_empty() {
            self.round = Round::Idle;
            self.targets.probes_completed();
        }
    }

    fn close_timed_out_round(&mut self) {
        let Round::Awaiting { pending, .. } = std::mem::replace(&mut self.round, Round::Idle) else {
            return;
        };
        tracing::trace!(count = pending.len(), "Probing round timed out");
        for fingerprint in pending {
            self.stats
                .record_latency(self.remote, fingerprint, self.config.timeout);
        }
        self.targets.probes_completed();
    }

    fn notify_down(&self, reply: &PingReply, error: &PingReplyError) -> anyhow::Result<()> {
        let fingerprint = reply
            .path_fingerprint
            .context("error reply without a reversible path")?;
        let interface = error
            .down_interface()
            .with_context(|| format!("error does not report a down interface: {error:?}"))?;
        tracing::debug!(%fingerprint, %interface, "Probe reported interface down");
        self.stats.notify_path_down(fingerprint, interface);
        Ok(())
    }
}
