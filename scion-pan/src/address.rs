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

//! SCION endhost addresses.
//!
//! An endhost is identified by the ISD-AS it lives in and a host address within that AS.

use std::{fmt, net::IpAddr, str::FromStr};

use thiserror::Error;

const ASN_BITS: u32 = 48;
const MAX_ASN: u64 = (1 << ASN_BITS) - 1;
const MAX_BGP_ASN: u64 = u32::MAX as u64;

/// Isolation domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Isd(pub u16);

/// Autonomous system number. Only the lower 48 bits are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asn(pub u64);

/// ISD-AS identifier, packed into a single `u64`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsdAsn(u64);

impl IsdAsn {
    /// Creates a new ISD-AS. Bits of the AS number above 48 are discarded.
    pub const fn new(isd: Isd, asn: Asn) -> Self {
        Self(((isd.0 as u64) << ASN_BITS) | (asn.0 & MAX_ASN))
    }

    /// Returns the ISD part.
    pub const fn isd(&self) -> Isd {
        Isd((self.0 >> ASN_BITS) as u16)
    }

    /// Returns the AS part.
    pub const fn asn(&self) -> Asn {
        Asn(self.0 & MAX_ASN)
    }

    /// Returns the big endian encoding of the ISD-AS.
    pub const fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for IsdAsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IsdAsn({self})")
    }
}

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 <= MAX_BGP_ASN {
            return write!(f, "{}", self.0);
        }
        write!(
            f,
            "{:x}:{:x}:{:x}",
            (self.0 >> 32) & 0xffff,
            (self.0 >> 16) & 0xffff,
            self.0 & 0xffff
        )
    }
}

impl fmt::Display for IsdAsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.isd().0, self.asn())
    }
}

/// Address parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    /// The ISD-AS is not of the form `<isd>-<asn>`.
    #[error("invalid ISD-AS {0:?}")]
    InvalidIsdAsn(String),
    /// The AS number is malformed or out of range.
    #[error("invalid AS number {0:?}")]
    InvalidAsn(String),
}

impl FromStr for Asn {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError::InvalidAsn(s.to_string());

        if !s.contains(':') {
            let value: u64 = s.parse().map_err(|_| invalid())?;
            if value > MAX_BGP_ASN {
                return Err(invalid());
            }
            return Ok(Asn(value));
        }

        let groups: Vec<&str> = s.split(':').collect();
        if groups.len() != 3 {
            return Err(invalid());
        }
        let mut value = 0u64;
        for group in groups {
            let part = u16::from_str_radix(group, 16).map_err(|_| invalid())?;
            value = (value << 16) | part as u64;
        }
        Ok(Asn(value))
    }
}

impl FromStr for IsdAsn {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (isd, asn) = s
            .split_once('-')
            .ok_or_else(|| AddressParseError::InvalidIsdAsn(s.to_string()))?;
        let isd: u16 = isd
            .parse()
            .map_err(|_| AddressParseError::InvalidIsdAsn(s.to_string()))?;
        Ok(IsdAsn::new(Isd(isd), asn.parse()?))
    }
}

/// A SCION host address: ISD-AS plus IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScionAddr {
    /// The ISD-AS of the host.
    pub isd_asn: IsdAsn,
    /// The IP address of the host within its AS.
    pub ip: IpAddr,
}

impl ScionAddr {
    /// Creates a new SCION host address.
    pub const fn new(isd_asn: IsdAsn, ip: IpAddr) -> Self {
        Self { isd_asn, ip }
    }
}

impl fmt::Display for ScionAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.isd_asn, self.ip)
    }
}

/// A SCION/UDP socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpAddr {
    /// The ISD-AS of the host.
    pub isd_asn: IsdAsn,
    /// The IP address of the host within its AS.
    pub ip: IpAddr,
    /// The UDP port.
    pub port: u16,
}

impl UdpAddr {
    /// Creates a new SCION/UDP socket address.
    pub const fn new(isd_asn: IsdAsn, ip: IpAddr, port: u16) -> Self {
        Self { isd_asn, ip, port }
    }

    /// Returns the host part of the address.
    pub const fn scion_addr(&self) -> ScionAddr {
        ScionAddr::new(self.isd_asn, self.ip)
    }

    /// Returns the UDP/IP part of the address.
    pub const fn ip_socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for UdpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{},{}:{}", self.isd_asn, ip, self.port),
            IpAddr::V6(ip) => write!(f, "{},[{}]:{}", self.isd_asn, ip, self.port),
        }
    }
}

/// A socket address handed to a socket by the application.
///
/// Only [`SocketAddr::Scion`] addresses can be used as destination of a SCION socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketAddr {
    /// A SCION/UDP address.
    Scion(UdpAddr),
    /// A plain UDP/IP address.
    Ip(std::net::SocketAddr),
}

impl From<UdpAddr> for SocketAddr {
    fn from(value: UdpAddr) -> Self {
        SocketAddr::Scion(value)
    }
}

impl From<std::net::SocketAddr> for SocketAddr {
    fn from(value: std::net::SocketAddr) -> Self {
        SocketAddr::Ip(value)
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddr::Scion(addr) => addr.fmt(f),
            SocketAddr::Ip(addr) => addr.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn formats_and_parses_isd_asn() {
        let ia = IsdAsn::new(Isd(1), Asn(0xff00_0000_0110));
        assert_eq!(ia.to_string(), "1-ff00:0:110");
        assert_eq!("1-ff00:0:110".parse::<IsdAsn>().unwrap(), ia);

        let bgp = IsdAsn::new(Isd(64), Asn(559));
        assert_eq!(bgp.to_string(), "64-559");
        assert_eq!("64-559".parse::<IsdAsn>().unwrap(), bgp);
    }

    #[test]
    fn rejects_malformed_isd_asn() {
        assert!("1".parse::<IsdAsn>().is_err());
        assert!("1-ff00:0".parse::<IsdAsn>().is_err());
        assert!("1-4294967296".parse::<IsdAsn>().is_err());
        assert!("x-1".parse::<IsdAsn>().is_err());
    }

    #[test]
    fn udp_addr_display() {
        let ia = IsdAsn::new(Isd(1), Asn(0xff00_0000_0111));
        let addr = UdpAddr::new(ia, Ipv4Addr::new(10, 0, 0, 1).into(), 8080);
        assert_eq!(addr.to_string(), "1-ff00:0:111,10.0.0.1:8080");
        assert_eq!(addr.scion_addr().to_string(), "1-ff00:0:111,10.0.0.1");
    }
}
