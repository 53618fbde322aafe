//! Layered message model.
//!
//! A `PhysicalMessage` carries a `Frame`, which carries a `Packet` or another
//! datalink payload. Messages are built once and never mutated: re-tagging or
//! TTL changes produce a new value.

mod address;
mod protocols;

pub use address::{mask_from_prefix, prefix_from_mask, wildcard_match, Ipv4Interface, MacAddress};
pub use protocols::{
    ArpMessage, ArpOp, BridgeId, Bpdu, HsrpMessage, HsrpOp, HsrpState, IcmpKind, IcmpMessage,
    OspfHello, PortId,
};

use bytes::Bytes;
use std::net::Ipv4Addr;

pub type VlanId = u16;

pub const DEFAULT_VLAN: VlanId = 1;
pub const MAX_VLAN: VlanId = 4094;

/// Which layer a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Physical,
    Datalink,
    Network,
}

/// Common view over every layer's message type.
pub trait Message {
    fn layer(&self) -> Layer;
    /// Size in bytes as it would appear at this layer.
    fn length(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketPayload {
    Icmp(IcmpMessage),
    Hsrp(HsrpMessage),
    Ospf(OspfHello),
    Raw(Bytes),
}

impl PacketPayload {
    pub fn length(&self) -> usize {
        match self {
            PacketPayload::Icmp(m) => m.length(),
            PacketPayload::Hsrp(_) => HsrpMessage::LENGTH,
            PacketPayload::Ospf(m) => m.length(),
            PacketPayload::Raw(b) => b.len(),
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            PacketPayload::Icmp(_) => "icmp",
            PacketPayload::Hsrp(_) => "hsrp",
            PacketPayload::Ospf(_) => "ospf",
            PacketPayload::Raw(_) => "raw",
        }
    }
}

/// IPv4 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    payload: PacketPayload,
}

impl Packet {
    pub const HEADER: usize = 20;
    pub const DEFAULT_TTL: u8 = 64;

    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, payload: PacketPayload) -> Self {
        Packet {
            src,
            dst,
            ttl: Self::DEFAULT_TTL,
            payload,
        }
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn src(&self) -> Ipv4Addr {
        self.src
    }

    pub fn dst(&self) -> Ipv4Addr {
        self.dst
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn payload(&self) -> &PacketPayload {
        &self.payload
    }

    /// Copy with TTL decremented, or `None` when it would reach zero.
    pub fn forwarded(&self) -> Option<Packet> {
        if self.ttl <= 1 {
            return None;
        }
        let mut next = self.clone();
        next.ttl -= 1;
        Some(next)
    }
}

impl Message for Packet {
    fn layer(&self) -> Layer {
        Layer::Network
    }

    fn length(&self) -> usize {
        Self::HEADER + self.payload.length()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Arp(ArpMessage),
    Ipv4(Packet),
    Bpdu(Bpdu),
    Raw(Bytes),
}

impl FramePayload {
    pub fn length(&self) -> usize {
        match self {
            FramePayload::Arp(_) => ArpMessage::LENGTH,
            FramePayload::Ipv4(p) => p.length(),
            FramePayload::Bpdu(_) => Bpdu::LENGTH,
            FramePayload::Raw(b) => b.len(),
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            FramePayload::Arp(_) => "arp",
            FramePayload::Ipv4(p) => p.payload().protocol_name(),
            FramePayload::Bpdu(_) => "stp",
            FramePayload::Raw(_) => "raw",
        }
    }
}

/// Ethernet II frame, optionally carrying an 802.1Q VLAN tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    src: MacAddress,
    dst: MacAddress,
    vlan: Option<VlanId>,
    payload: FramePayload,
}

impl Frame {
    pub const HEADER: usize = 14;
    pub const TAG: usize = 4;
    pub const FCS: usize = 4;
    pub const MIN_PAYLOAD: usize = 46;

    pub fn new(src: MacAddress, dst: MacAddress, payload: FramePayload) -> Self {
        Frame {
            src,
            dst,
            vlan: None,
            payload,
        }
    }

    /// Same frame with the 802.1Q tag set or stripped.
    pub fn tagged(&self, vlan: Option<VlanId>) -> Frame {
        Frame {
            vlan,
            ..self.clone()
        }
    }

    /// Same payload re-addressed from a different source.
    pub fn with_src(&self, src: MacAddress) -> Frame {
        Frame { src, ..self.clone() }
    }

    pub fn src(&self) -> MacAddress {
        self.src
    }

    pub fn dst(&self) -> MacAddress {
        self.dst
    }

    pub fn vlan(&self) -> Option<VlanId> {
        self.vlan
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    pub fn packet(&self) -> Option<&Packet> {
        match &self.payload {
            FramePayload::Ipv4(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_flooded(&self) -> bool {
        self.dst.is_multicast()
    }
}

impl Message for Frame {
    fn layer(&self) -> Layer {
        Layer::Datalink
    }

    fn length(&self) -> usize {
        let tag = if self.vlan.is_some() { Self::TAG } else { 0 };
        Self::HEADER + tag + self.payload.length().max(Self::MIN_PAYLOAD) + Self::FCS
    }
}

/// Bits on the wire: a frame plus preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalMessage {
    frame: Frame,
}

impl PhysicalMessage {
    pub const PREAMBLE: usize = 8;

    pub fn new(frame: Frame) -> Self {
        PhysicalMessage { frame }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

impl Message for PhysicalMessage {
    fn layer(&self) -> Layer {
        Layer::Physical
    }

    fn length(&self) -> usize {
        Self::PREAMBLE + self.frame.length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icmp(data_len: usize) -> Packet {
        Packet::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            PacketPayload::Icmp(IcmpMessage {
                kind: IcmpKind::EchoRequest,
                identifier: 1,
                sequence: 0,
                data_len,
            }),
        )
    }

    #[test]
    fn test_lengths_stack_per_layer() {
        let packet = icmp(56);
        assert_eq!(packet.length(), 84);
        let frame = Frame::new(MacAddress::ZERO, MacAddress::BROADCAST, FramePayload::Ipv4(packet));
        assert_eq!(frame.length(), 14 + 84 + 4);
        assert_eq!(frame.tagged(Some(10)).length(), 14 + 4 + 84 + 4);
        assert_eq!(PhysicalMessage::new(frame).length(), 8 + 102);
    }

    #[test]
    fn test_short_frames_are_padded() {
        let frame = Frame::new(
            MacAddress::ZERO,
            MacAddress::BROADCAST,
            FramePayload::Arp(ArpMessage::request(MacAddress::ZERO, Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST)),
        );
        assert_eq!(frame.length(), 64);
    }

    #[test]
    fn test_forwarded_decrements_ttl() {
        let p = icmp(0).with_ttl(2);
        let next = p.forwarded().unwrap();
        assert_eq!(next.ttl(), 1);
        assert!(next.forwarded().is_none());
        assert_eq!(p.ttl(), 2);
    }
}
