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

//! Helpers to build paths in tests.

use std::net::{Ipv4Addr, SocketAddr};

use bytes::{BufMut, BytesMut};

use crate::{
    address::{Asn, Isd, IsdAsn},
    path::{DataplanePath, ForwardingPath, Path, PathInterface},
};

/// Returns the ISD-AS `1-<asn>`.
pub const fn ia(asn: u64) -> IsdAsn {
    IsdAsn::new(Isd(1), Asn(asn))
}

/// Builder for test paths.
///
/// ```
/// use scion_pan::path::test_builder::{TestPathBuilder, ia};
///
/// let path = TestPathBuilder::new(ia(1), ia(3))
///     .add_hop(ia(1), 0, 1)
///     .add_hop(ia(2), 2, 3)
///     .add_hop(ia(3), 4, 0)
///     .build();
/// assert_eq!(path.interface_count(), 4);
/// ```
pub struct TestPathBuilder {
    source: IsdAsn,
    destination: IsdAsn,
    interfaces: Vec<PathInterface>,
    underlay: SocketAddr,
}

impl TestPathBuilder {
    /// Creates a builder for a path from `source` to `destination`.
    pub fn new(source: IsdAsn, destination: IsdAsn) -> Self {
        Self {
            source,
            destination,
            interfaces: Vec::new(),
            underlay: SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), 31002),
        }
    }

    /// Sets the first hop router address.
    pub fn with_underlay(mut self, underlay: SocketAddr) -> Self {
        self.underlay = underlay;
        self
    }

    /// Adds an AS hop. Interface ID 0 means the hop has no such interface.
    pub fn add_hop(mut self, isd_asn: IsdAsn, ingress: u16, egress: u16) -> Self {
        if ingress != 0 {
            self.interfaces.push(PathInterface::new(isd_asn, ingress));
        }
        if egress != 0 {
            self.interfaces.push(PathInterface::new(isd_asn, egress));
        }
        self
    }

    /// Builds the path. The raw data plane path encodes the interface sequence.
    pub fn build(self) -> Path {
        let mut raw = BytesMut::with_capacity(self.interfaces.len() * 10);
        for interface in &self.interfaces {
            raw.put_slice(&interface.isd_asn.to_be_bytes());
            raw.put_u16(interface.id);
        }
        Path::new(
            self.source,
            self.destination,
            self.interfaces,
            ForwardingPath::new(
                Some(self.underlay),
                DataplanePath::Standard(raw.freeze()),
            ),
        )
    }
}

/// Builds a path from AS `1-<src>` to AS `1-<dst>` traversing the given `(asn, interface)`
/// sequence.
pub fn dummy_path(src: u64, dst: u64, interfaces: &[(u64, u16)]) -> Path {
    let mut builder = TestPathBuilder::new(ia(src), ia(dst));
    for (asn, id) in interfaces {
        builder.interfaces.push(PathInterface::new(ia(*asn), *id));
    }
    builder.build()
}
