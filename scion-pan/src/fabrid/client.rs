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

//! Source side FABRID state.
//!
//! The source negotiates a validation ratio with the destination and may ask it for validation
//! statistics. Requests travel as control options on outgoing packets and the answers arrive as
//! control options on incoming packets. Both are tracked per path in a [FabridPathState].

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use crate::{
    address::ScionAddr,
    fabrid::{FabridError, FabridPolicy},
    path::PathFingerprint,
};

/// Called with the result of every validation response.
///
/// The handler may adjust the path state, e.g. raise the validation ratio after failures.
/// Returning an error aborts the read that delivered the response.
pub type ValidationHandler = Arc<
    dyn Fn(&mut PathState, &FabridControlOption, bool) -> Result<(), FabridError> + Send + Sync,
>;

/// FABRID configuration of a dialed connection.
#[derive(Clone, Default)]
pub struct FabridConfig {
    /// Policy requested from every on-path AS.
    pub policy: FabridPolicy,
    /// Requested share of packets, out of 255, the destination validates.
    pub validation_ratio: u8,
    /// Optional handler for validation responses.
    pub validation_handler: Option<ValidationHandler>,
}

impl fmt::Debug for FabridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabridConfig")
            .field("policy", &self.policy)
            .field("validation_ratio", &self.validation_ratio)
            .field(
                "validation_handler",
                &self.validation_handler.as_ref().map(|_| "Fn"),
            )
            .finish()
    }
}

/// FABRID control options exchanged in end-to-end extension headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabridControlOption {
    /// Requests a validation ratio from the destination.
    ValidationConfig {
        /// Requested ratio.
        validation_ratio: u8,
    },
    /// Confirms the validation ratio the destination applies.
    ValidationConfigAck {
        /// Applied ratio, may be lower than the requested one.
        validation_ratio: u8,
    },
    /// Result of validating the path validator the destination returned for a packet.
    ValidationResponse {
        /// The validated packet.
        packet_id: u32,
        /// Whether the validator matched.
        valid: bool,
    },
    /// Requests validation statistics from the destination.
    StatisticsRequest,
    /// Validation statistics of the destination.
    StatisticsResponse {
        /// Packets received on the path.
        total_packets: u32,
        /// Packets that failed validation.
        invalid_packets: u32,
    },
}

impl FabridControlOption {
    fn name(&self) -> &'static str {
        match self {
            FabridControlOption::ValidationConfig { .. } => "validation config",
            FabridControlOption::ValidationConfigAck { .. } => "validation config ack",
            FabridControlOption::ValidationResponse { .. } => "validation response",
            FabridControlOption::StatisticsRequest => "statistics request",
            FabridControlOption::StatisticsResponse { .. } => "statistics response",
        }
    }
}

/// Packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FabridStatistics {
    /// Total packets.
    pub total_packets: u32,
    /// Packets that failed validation.
    pub invalid_packets: u32,
}

/// Validation state of one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathState {
    /// Requested validation ratio.
    pub validation_ratio: u8,
    /// Set while the requested ratio has not been acknowledged.
    pub update_validation_ratio: bool,
    /// Set while a statistics request is due.
    pub request_statistics: bool,
    /// Validation responses checked at the source.
    pub source_validation: FabridStatistics,
    /// Latest statistics reported by the destination.
    pub destination_statistics: Option<FabridStatistics>,
}

/// Shared handle to the validation state of one path.
#[derive(Debug)]
pub struct FabridPathState {
    fingerprint: PathFingerprint,
    state: Mutex<PathState>,
}

impl FabridPathState {
    fn new(fingerprint: PathFingerprint, validation_ratio: u8) -> Self {
        Self {
            fingerprint,
            state: Mutex::new(PathState {
                validation_ratio,
                update_validation_ratio: true,
                ..Default::default()
            }),
        }
    }

    /// Returns the fingerprint of the path.
    pub fn fingerprint(&self) -> PathFingerprint {
        self.fingerprint
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> PathState {
        self.state.lock().expect("lock poisoned").clone()
    }

    /// Modifies the state.
    pub fn update<R>(&self, f: impl FnOnce(&mut PathState) -> R) -> R {
        f(&mut self.state.lock().expect("lock poisoned"))
    }
}

/// FABRID client of one dialed connection.
pub struct FabridClient {
    local: ScionAddr,
    destination: ScionAddr,
    config: FabridConfig,
    paths: Mutex<HashMap<PathFingerprint, Arc<FabridPathState>>>,
}

impl fmt::Debug for FabridClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabridClient")
            .field("local", &self.local)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl FabridClient {
    /// Creates a client for the connection between `local` and `destination`.
    pub fn new(local: ScionAddr, destination: ScionAddr, config: FabridConfig) -> Self {
        Self {
            local,
            destination,
            config,
            paths: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the local host.
    pub fn local(&self) -> ScionAddr {
        self.local
    }

    /// Returns the destination host.
    pub fn destination(&self) -> ScionAddr {
        self.destination
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FabridConfig {
        &self.config
    }

    /// Returns the state of a path, creating it with the configured validation ratio if needed.
    pub fn new_path_state(&self, fingerprint: PathFingerprint) -> Arc<FabridPathState> {
        let mut paths = self.paths.lock().expect("lock poisoned");
        paths
            .entry(fingerprint)
            .or_insert_with(|| {
                Arc::new(FabridPathState::new(
                    fingerprint,
                    self.config.validation_ratio,
                ))
            })
            .clone()
    }

    /// Returns the state of a path, if it exists.
    pub fn path_state(&self, fingerprint: PathFingerprint) -> Option<Arc<FabridPathState>> {
        self.paths
            .lock()
            .expect("lock poisoned")
            .get(&fingerprint)
            .cloned()
    }

    /// Requests statistics from the destination on every path with the next packet.
    pub fn request_statistics(&self) {
        for state in self.paths.lock().expect("lock poisoned").values() {
            state.update(|s| s.request_statistics = true);
        }
    }

    /// Returns the control options to attach to the next packet sent on a path.
    ///
    /// A validation config is repeated until acknowledged, a statistics request is sent once.
    pub fn pending_options(&self, fingerprint: PathFingerprint) -> Vec<FabridControlOption> {
        let Some(state) = self.path_state(fingerprint) else {
            return Vec::new();
        };
        state.update(|s| {
            let mut options = Vec::new();
            if s.update_validation_ratio {
                options.push(FabridControlOption::ValidationConfig {
                    validation_ratio: s.validation_ratio,
                });
            }
            if std::mem::take(&mut s.request_statistics) {
                options.push(FabridControlOption::StatisticsRequest);
            }
            options
        })
    }

    /// Applies a control option received on a path.
    pub fn handle_control_option(
        &self,
        fingerprint: PathFingerprint,
        option: FabridControlOption,
    ) -> Result<(), FabridError> {
        let state = self
            .path_state(fingerprint)
            .ok_or(FabridError::UnknownPath(fingerprint))?;
        state.update(|s| {
            match option {
                FabridControlOption::ValidationConfigAck { validation_ratio } => {
                    if validation_ratio != s.validation_ratio {
                        tracing::info!(
                            %fingerprint,
                            requested = s.validation_ratio,
                            applied = validation_ratio,
                            "Destination lowered the validation ratio"
                        );
                        s.validation_ratio = validation_ratio;
                    }
                    s.update_validation_ratio = false;
                    Ok(())
                }
                FabridControlOption::ValidationResponse { valid, .. } => {
                    let counters = &mut s.source_validation;
                    counters.total_packets = counters.total_packets.saturating_add(1);
                    if !valid {
                        counters.invalid_packets = counters.invalid_packets.saturating_add(1);
                    }
                    match &self.config.validation_handler {
                        Some(handler) => handler(s, &option, valid),
                        None => Ok(()),
                    }
                }
                FabridControlOption::StatisticsResponse {
                    total_packets,
                    invalid_packets,
                } => {
                    s.destination_statistics = Some(FabridStatistics {
                        total_packets,
                        invalid_packets,
                    });
                    Ok(())
                }
                FabridControlOption::ValidationConfig { .. }
                | FabridControlOption::StatisticsRequest => {
                    Err(FabridError::UnexpectedControlOption(option.name()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::path::test_builder::ia;

    fn client(config: FabridConfig) -> FabridClient {
        FabridClient::new(
            ScionAddr::new(ia(1), Ipv4Addr::new(10, 0, 0, 1).into()),
            ScionAddr::new(ia(2), Ipv4Addr::new(10, 0, 0, 2).into()),
            config,
        )
    }

    fn fingerprint() -> PathFingerprint {
        PathFingerprint::from([1; 32])
    }

    #[test]
    fn validation_config_is_repeated_until_acknowledged() {
        let client = client(FabridConfig {
            validation_ratio: 100,
            ..Default::default()
        });
        client.new_path_state(fingerprint());

        let expected = vec![FabridControlOption::ValidationConfig {
            validation_ratio: 100,
        }];
        assert_eq!(client.pending_options(fingerprint()), expected);
        assert_eq!(client.pending_options(fingerprint()), expected);

        client
            .handle_control_option(
                fingerprint(),
                FabridControlOption::ValidationConfigAck {
                    validation_ratio: 50,
                },
            )
            .unwrap();
        assert!(client.pending_options(fingerprint()).is_empty());
        assert_eq!(
            client.path_state(fingerprint()).unwrap().snapshot().validation_ratio,
            50
        );
    }

    #[test]
    fn statistics_are_requested_once() {
        let client = client(FabridConfig::default());
        let state = client.new_path_state(fingerprint());
        state.update(|s| s.update_validation_ratio = false);

        client.request_statistics();
        assert_eq!(
            client.pending_options(fingerprint()),
            vec![FabridControlOption::StatisticsRequest]
        );
        assert!(client.pending_options(fingerprint()).is_empty());

        client
            .handle_control_option(
                fingerprint(),
                FabridControlOption::StatisticsResponse {
                    total_packets: 10,
                    invalid_packets: 1,
                },
            )
            .unwrap();
        assert_eq!(
            state.snapshot().destination_statistics,
            Some(FabridStatistics {
                total_packets: 10,
                invalid_packets: 1,
            })
        );
    }

    #[test]
    fn validation_handler_sees_failures() {
        let handler: ValidationHandler = Arc::new(
            |state: &mut PathState, _option: &FabridControlOption, valid: bool| {
                if !valid {
                    state.validation_ratio = state.validation_ratio.saturating_mul(2);
                    state.update_validation_ratio = true;
                }
                Ok(())
            },
        );
        let client = client(FabridConfig {
            validation_ratio: 10,
            validation_handler: Some(handler),
            ..Default::default()
        });
        let state = client.new_path_state(fingerprint());

        for valid in [true, false] {
            client
                .handle_control_option(
                    fingerprint(),
                    FabridControlOption::ValidationResponse {
                        packet_id: 1,
                        valid,
                    },
                )
                .unwrap();
        }
        let snapshot = state.snapshot();
        assert_eq!(
            snapshot.source_validation,
            FabridStatistics {
                total_packets: 2,
                invalid_packets: 1,
            }
        );
        assert_eq!(snapshot.validation_ratio, 20);
    }

    #[test]
    fn validation_counters_saturate() {
        let client = client(FabridConfig::default());
        let state = client.new_path_state(fingerprint());
        state.update(|s| {
            s.source_validation = FabridStatistics {
                total_packets: u32::MAX,
                invalid_packets: u32::MAX,
            }
        });

        client
            .handle_control_option(
                fingerprint(),
                FabridControlOption::ValidationResponse {
                    packet_id: 7,
                    valid: false,
                },
            )
            .unwrap();
        assert_eq!(
            state.snapshot().source_validation,
            FabridStatistics {
                total_packets: u32::MAX,
                invalid_packets: u32::MAX,
            }
        );
    }

    #[test]
    fn rejects_unknown_paths_and_destination_options() {
        let client = client(FabridConfig::default());
        assert!(matches!(
            client.handle_control_option(fingerprint(), FabridControlOption::StatisticsRequest),
            Err(FabridError::UnknownPath(_))
        ));

        client.new_path_state(fingerprint());
        assert!(matches!(
            client.handle_control_option(fingerprint(), FabridControlOption::StatisticsRequest),
            Err(FabridError::UnexpectedControlOption(_))
        ));
    }

    #[test]
    fn path_state_is_shared_per_fingerprint() {
        let client = client(FabridConfig::default());
        let a = client.new_path_state(fingerprint());
        let b = client.new_path_state(fingerprint());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
