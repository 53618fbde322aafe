//! Protocol payloads carried inside frames and packets.

use super::address::MacAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArpOp {
    Request,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpMessage {
    pub op: ArpOp,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpMessage {
    pub const LENGTH: usize = 28;

    pub fn request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpMessage {
            op: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        }
    }

    pub fn reply(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_mac: MacAddress, target_ip: Ipv4Addr) -> Self {
        ArpMessage {
            op: ArpOp::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Unsolicited announcement of `ip` at `mac`.
    pub fn gratuitous(mac: MacAddress, ip: Ipv4Addr) -> Self {
        ArpMessage {
            op: ArpOp::Reply,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: MacAddress::BROADCAST,
            target_ip: ip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcmpKind {
    EchoRequest,
    EchoReply,
    DestinationUnreachable,
    TimeExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpMessage {
    pub kind: IcmpKind,
    pub identifier: u16,
    pub sequence: u16,
    pub data_len: usize,
}

impl IcmpMessage {
    pub const HEADER: usize = 8;

    pub fn length(&self) -> usize {
        Self::HEADER + self.data_len
    }
}

/// Bridge identifier; derived ordering compares priority first, then MAC,
/// which is the 802.1D "lower is better" order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BridgeId {
    pub priority: u16,
    pub mac: MacAddress,
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.priority, self.mac.cisco())
    }
}

/// Port identifier: priority in the high byte, port number in the low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortId(pub u16);

impl PortId {
    pub fn new(priority: u8, number: u16) -> Self {
        PortId(((priority as u16) << 8) | (number & 0xff))
    }

    pub fn number(&self) -> u16 {
        self.0 & 0xff
    }

    pub fn priority(&self) -> u8 {
        (self.0 >> 8) as u8
    }
}

/// Configuration BPDU. Timer fields are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bpdu {
    pub root: BridgeId,
    pub root_path_cost: u32,
    pub bridge: BridgeId,
    pub port: PortId,
    pub message_age: u16,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
}

impl Bpdu {
    pub const LENGTH: usize = 35;

    /// Priority vector used for superiority comparisons.
    pub fn vector(&self) -> (BridgeId, u32, BridgeId, PortId) {
        (self.root, self.root_path_cost, self.bridge, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HsrpState {
    Initial,
    Learn,
    Listen,
    Speak,
    Standby,
    Active,
}

impl fmt::Display for HsrpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HsrpState::Initial => "Init",
            HsrpState::Learn => "Learn",
            HsrpState::Listen => "Listen",
            HsrpState::Speak => "Speak",
            HsrpState::Standby => "Standby",
            HsrpState::Active => "Active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HsrpOp {
    Hello,
    Coup,
    Resign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsrpMessage {
    pub op: HsrpOp,
    pub state: HsrpState,
    pub hello_secs: u8,
    pub hold_secs: u8,
    pub priority: u8,
    pub group: u8,
    pub virtual_ip: Option<Ipv4Addr>,
}

impl HsrpMessage {
    /// HSRP body plus its UDP header.
    pub const LENGTH: usize = 28;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfHello {
    pub router_id: Ipv4Addr,
    pub area: u32,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub neighbors: Vec<Ipv4Addr>,
}

impl OspfHello {
    pub fn length(&self) -> usize {
        44 + 4 * self.neighbors.len()
    }
}
