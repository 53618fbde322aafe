//! Hardware and IPv4 addressing.

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);
    pub const ZERO: MacAddress = MacAddress([0; 6]);
    /// Destination for 802.1D configuration BPDUs.
    pub const STP_MULTICAST: MacAddress = MacAddress([0x01, 0x80, 0xc2, 0x00, 0x00, 0x00]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set: broadcast and multicast both flood.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Locally administered unicast address from 40 random bits.
    pub fn local(bytes: [u8; 5]) -> Self {
        MacAddress([0x02, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]])
    }

    /// Well-known HSRP v1 virtual MAC `0000.0c07.acXX`.
    pub fn hsrp_virtual(group: u8) -> Self {
        MacAddress([0x00, 0x00, 0x0c, 0x07, 0xac, group])
    }

    /// IPv4 multicast group mapped onto `01:00:5e` + low 23 bits.
    pub fn ipv4_multicast(group: Ipv4Addr) -> Self {
        let o = group.octets();
        MacAddress([0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]])
    }

    /// Cisco dotted form, e.g. `0000.0c07.ac01`.
    pub fn cisco(&self) -> String {
        let b = self.0;
        format!(
            "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = SimError;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` and `aabb.ccdd.eeff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| !matches!(c, ':' | '-' | '.')).collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SimError::InvalidAddress(s.to_string()));
        }
        let mut out = [0u8; 6];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| SimError::InvalidAddress(s.to_string()))?;
        }
        Ok(MacAddress(out))
    }
}

/// An IPv4 address bound to a prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Interface {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Interface {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, SimError> {
        if prefix_len > 32 {
            return Err(SimError::InvalidAddress(format!("{}/{}", address, prefix_len)));
        }
        Ok(Ipv4Interface {
            address,
            prefix_len,
        })
    }

    /// Build from a dotted netmask such as `255.255.255.0`.
    pub fn with_mask(address: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, SimError> {
        let prefix_len = prefix_from_mask(mask)?;
        Self::new(address, prefix_len)
    }

    pub fn mask(&self) -> Ipv4Addr {
        mask_from_prefix(self.prefix_len)
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.mask()))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) | !u32::from(self.mask()))
    }

    pub fn contains(&self, other: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask());
        u32::from(self.address) & mask == u32::from(other) & mask
    }
}

impl fmt::Display for Ipv4Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

pub fn mask_from_prefix(prefix_len: u8) -> Ipv4Addr {
    if prefix_len == 0 {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from(u32::MAX << (32 - prefix_len.min(32) as u32))
    }
}

/// Rejects masks whose one-bits are not contiguous.
pub fn prefix_from_mask(mask: Ipv4Addr) -> Result<u8, SimError> {
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    if bits.checked_shl(ones).unwrap_or(0) != 0 {
        return Err(SimError::InvalidAddress(format!("{} is not a valid netmask", mask)));
    }
    Ok(ones as u8)
}

/// Whether `addr` matches `network` under an OSPF-style wildcard mask.
pub fn wildcard_match(network: Ipv4Addr, wildcard: Ipv4Addr, addr: Ipv4Addr) -> bool {
    let care = !u32::from(wildcard);
    u32::from(network) & care == u32::from(addr) & care
}
