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

//! Per-hop policy annotations.

use std::fmt;

use crate::{
    address::IsdAsn,
    fabrid::FabridError,
    path::PathInterface,
};

/// A FABRID forwarding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FabridPolicy {
    /// A policy defined by the on-path AS itself.
    Local(u32),
    /// A policy with a globally agreed meaning. `Global(0)` only requests path validation.
    Global(u32),
}

impl Default for FabridPolicy {
    fn default() -> Self {
        FabridPolicy::Global(0)
    }
}

impl fmt::Display for FabridPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FabridPolicy::Local(id) => write!(f, "L{id}"),
            FabridPolicy::Global(id) => write!(f, "G{id}"),
        }
    }
}

/// The policy requested from one AS on a path.
///
/// An interface ID of 0 means the hop has no such interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabridPolicyPerHop {
    /// The requested policy.
    pub policy: FabridPolicy,
    /// The AS of the hop.
    pub isd_asn: IsdAsn,
    /// Ingress interface, 0 for the first hop.
    pub ingress: u16,
    /// Egress interface, 0 for the last hop.
    pub egress: u16,
}

/// Derives one policy record per AS on a path from its interface sequence.
///
/// The first hop only has an egress interface and the last hop only an ingress interface. Every
/// interior hop is an (ingress, egress) pair.
pub fn hops_for_path(
    interfaces: &[PathInterface],
    policy: FabridPolicy,
) -> Result<Vec<FabridPolicyPerHop>, FabridError> {
    let (Some(first), Some(last)) = (interfaces.first(), interfaces.last()) else {
        return Err(FabridError::InvalidPath("path has no interfaces".into()));
    };
    if interfaces.len() % 2 != 0 {
        return Err(FabridError::InvalidPath(
            format!("odd number of interfaces: {}", interfaces.len()).into(),
        ));
    }

    let mut hops = Vec::with_capacity(interfaces.len() / 2 + 1);
    hops.push(FabridPolicyPerHop {
        policy,
        isd_asn: first.isd_asn,
        ingress: 0,
        egress: first.id,
    });
    for pair in interfaces[1..interfaces.len() - 1].chunks_exact(2) {
        let (ingress, egress) = (pair[0], pair[1]);
        if ingress.isd_asn != egress.isd_asn {
            return Err(FabridError::InvalidPath(
                format!("interfaces {ingress} and {egress} belong to different ASes").into(),
            ));
        }
        hops.push(FabridPolicyPerHop {
            policy,
            isd_asn: ingress.isd_asn,
            ingress: ingress.id,
            egress: egress.id,
        });
    }
    hops.push(FabridPolicyPerHop {
        policy,
        isd_asn: last.isd_asn,
        ingress: last.id,
        egress: 0,
    });
    Ok(hops)
}
