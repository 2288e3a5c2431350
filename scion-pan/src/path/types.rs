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

//! Path data model.

use std::{fmt, sync::Arc, time::SystemTime};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::{address::IsdAsn, fabrid::FabridDataplanePath};

/// An interface of an AS on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathInterface {
    /// The AS the interface belongs to.
    pub isd_asn: IsdAsn,
    /// The AS-local interface ID.
    pub id: u16,
}

impl PathInterface {
    /// Creates a new path interface.
    pub const fn new(isd_asn: IsdAsn, id: u16) -> Self {
        Self { isd_asn, id }
    }
}

impl fmt::Display for PathInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.isd_asn, self.id)
    }
}

/// A fingerprint identifying the hop sequence of a path.
///
/// Two paths with the same endpoints and the same interface sequence share a fingerprint,
/// regardless of their forwarding payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathFingerprint([u8; PathFingerprint::LENGTH]);

impl PathFingerprint {
    const LENGTH: usize = 32;
    const DISPLAYED_BYTES: usize = 8;

    /// Computes the fingerprint of the given hop sequence.
    pub fn new(source: IsdAsn, destination: IsdAsn, interfaces: &[PathInterface]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.to_be_bytes());
        hasher.update(destination.to_be_bytes());
        for interface in interfaces {
            hasher.update(interface.isd_asn.to_be_bytes());
            hasher.update(interface.id.to_be_bytes());
        }
        PathFingerprint(hasher.finalize().into())
    }
}

impl From<[u8; 32]> for PathFingerprint {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for PathFingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PathFingerprint {
    /// Formats the first 8 bytes as lower-case hex. The alternate flag formats all 32 bytes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match f.alternate() {
            true => Self::LENGTH,
            false => Self::DISPLAYED_BYTES,
        };
        for byte in &self.0[..n] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PathFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathFingerprint({self})")
    }
}

/// The data plane representation of a path.
#[derive(Debug, Clone)]
pub enum DataplanePath {
    /// Empty path, used for AS-local communication.
    Empty,
    /// Raw standard SCION path.
    Standard(Bytes),
    /// Standard SCION path augmented with FABRID per-hop validation state.
    Fabrid(Arc<FabridDataplanePath>),
}

impl DataplanePath {
    /// Returns true if the path carries FABRID validation state.
    pub fn is_fabrid(&self) -> bool {
        matches!(self, DataplanePath::Fabrid(_))
    }
}

/// Everything needed to put a packet on the wire along a path.
#[derive(Debug, Clone)]
pub struct ForwardingPath {
    /// Address of the first border router, if any.
    pub underlay: Option<std::net::SocketAddr>,
    /// Data plane path.
    pub dataplane: DataplanePath,
}

impl ForwardingPath {
    /// Creates a new forwarding path.
    pub fn new(underlay: Option<std::net::SocketAddr>, dataplane: DataplanePath) -> Self {
        Self {
            underlay,
            dataplane,
        }
    }
}

/// Immutable snapshot of a route between two ASes.
///
/// Paths are shared as `Arc<Path>` and compared by [`PathFingerprint`], never by identity.
/// Replacing the forwarding payload creates a new value, see [`Path::with_dataplane`].
#[derive(Debug, Clone)]
pub struct Path {
    /// Source ISD-AS.
    pub source: IsdAsn,
    /// Destination ISD-AS.
    pub destination: IsdAsn,
    interfaces: Arc<[PathInterface]>,
    fingerprint: PathFingerprint,
    /// Forwarding payload.
    pub forwarding: ForwardingPath,
    /// Expiry time of the path, if known.
    pub expiry: Option<SystemTime>,
}

impl Path {
    /// Creates a new path.
    ///
    /// `interfaces` is the sequence of traversed interfaces, starting with the egress interface
    /// of the source AS and ending with the ingress interface of the destination AS.
    pub fn new(
        source: IsdAsn,
        destination: IsdAsn,
        interfaces: Vec<PathInterface>,
        forwarding: ForwardingPath,
    ) -> Self {
        let fingerprint = PathFingerprint::new(source, destination, &interfaces);
        Self {
            source,
            destination,
            interfaces: interfaces.into(),
            fingerprint,
            forwarding,
            expiry: None,
        }
    }

    /// Creates an empty path for AS-local communication.
    pub fn local(isd_asn: IsdAsn) -> Self {
        Self::new(
            isd_asn,
            isd_asn,
            vec![],
            ForwardingPath::new(None, DataplanePath::Empty),
        )
    }

    /// Sets the expiry time.
    pub fn with_expiry(mut self, expiry: SystemTime) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Returns a copy of this path with a different data plane path.
    ///
    /// The fingerprint is unchanged, holders of the original value are unaffected.
    pub fn with_dataplane(&self, dataplane: DataplanePath) -> Self {
        Self {
            forwarding: ForwardingPath::new(self.forwarding.underlay, dataplane),
            ..self.clone()
        }
    }

    /// Returns the fingerprint of the hop sequence.
    pub fn fingerprint(&self) -> PathFingerprint {
        self.fingerprint
    }

    /// Returns the traversed interfaces.
    pub fn interfaces(&self) -> &[PathInterface] {
        &self.interfaces
    }

    /// Returns the number of traversed interfaces.
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// Returns true if the path traverses the given interface.
    pub fn contains_interface(&self, interface: &PathInterface) -> bool {
        self.interfaces.contains(interface)
    }

    /// Returns true if a down notification for `fingerprint` or `interface` concerns this path.
    pub fn is_affected_by(&self, fingerprint: PathFingerprint, interface: &PathInterface) -> bool {
        self.fingerprint == fingerprint || self.contains_interface(interface)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} > {} [", self.source, self.destination)?;
        for (i, interface) in self.interfaces.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{interface}")?;
        }
        write!(f, "] ({})", self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::{Asn, Isd},
        path::test_builder::{dummy_path, ia},
    };

    #[test]
    fn fingerprint_depends_only_on_hops() {
        let a = dummy_path(1, 2, &[(1, 1), (3, 2)]);
        let b = a.with_dataplane(DataplanePath::Standard(Bytes::from_static(b"other")));
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = dummy_path(1, 2, &[(1, 2), (3, 2)]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn affected_by_fingerprint_or_interface() {
        let path = dummy_path(1, 2, &[(1, 1), (3, 2)]);
        let unrelated = PathInterface::new(IsdAsn::new(Isd(9), Asn(9)), 9);

        assert!(path.is_affected_by(path.fingerprint(), &unrelated));
        assert!(path.is_affected_by(
            PathFingerprint::from([0; 32]),
            &PathInterface::new(ia(3), 2)
        ));
        assert!(!path.is_affected_by(PathFingerprint::from([0; 32]), &unrelated));
    }

    #[test]
    fn fingerprint_display_is_truncated() {
        let fp = PathFingerprint::from([0xab; 32]);
        assert_eq!(fp.to_string(), "abababababababab");
        assert_eq!(format!("{fp:#}").len(), 64);
    }
}
