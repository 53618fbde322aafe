//! Interfaces, layered by composition: a `NetworkInterface` wraps a
//! `DatalinkInterface`, which wraps a `HardwareInterface`. Accessors on the
//! outer layers pass through to the inner ones.

use super::{InterfaceId, LinkId};
use crate::error::SimError;
use crate::message::{Ipv4Interface, MacAddress, VlanId, DEFAULT_VLAN};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplexSetting {
    Auto,
    Full,
    Half,
}

impl fmt::Display for DuplexSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuplexSetting::Auto => "auto",
            DuplexSetting::Full => "full",
            DuplexSetting::Half => "half",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct HardwareInterface {
    pub name: String,
    pub speed_mbps: u32,
    pub duplex: DuplexSetting,
    pub admin_up: bool,
    pub link: Option<LinkId>,
}

impl HardwareInterface {
    pub fn new(name: impl Into<String>, speed_mbps: u32) -> Self {
        HardwareInterface {
            name: name.into(),
            speed_mbps,
            duplex: DuplexSetting::Auto,
            admin_up: true,
            link: None,
        }
    }
}

/// Spanning-tree forwarding state of a switch port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    Disabled,
    Blocking,
    Listening,
    Learning,
    Forwarding,
}

impl PortState {
    pub fn learns(&self) -> bool {
        matches!(self, PortState::Learning | PortState::Forwarding)
    }

    pub fn forwards(&self) -> bool {
        matches!(self, PortState::Forwarding)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortState::Disabled => "DIS",
            PortState::Blocking => "BLK",
            PortState::Listening => "LIS",
            PortState::Learning => "LRN",
            PortState::Forwarding => "FWD",
        };
        f.write_str(name)
    }
}

/// 802.1Q port mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlanMode {
    Access(VlanId),
    /// `allowed: None` carries every VLAN.
    Trunk {
        allowed: Option<BTreeSet<VlanId>>,
        native: VlanId,
    },
}

impl Default for VlanMode {
    fn default() -> Self {
        VlanMode::Access(DEFAULT_VLAN)
    }
}

impl VlanMode {
    pub fn trunk() -> Self {
        VlanMode::Trunk {
            allowed: None,
            native: DEFAULT_VLAN,
        }
    }

    pub fn carries(&self, vlan: VlanId) -> bool {
        match self {
            VlanMode::Access(v) => *v == vlan,
            VlanMode::Trunk { allowed, .. } => allowed.as_ref().map_or(true, |set| set.contains(&vlan)),
        }
    }

    /// VLAN a frame belongs to after arriving with `tag`, or `None` if the
    /// port does not accept it.
    pub fn ingress_vlan(&self, tag: Option<VlanId>) -> Option<VlanId> {
        let vlan = match (self, tag) {
            (VlanMode::Access(v), None) => *v,
            (VlanMode::Access(_), Some(_)) => return None,
            (VlanMode::Trunk { native, .. }, None) => *native,
            (VlanMode::Trunk { .. }, Some(tag)) => tag,
        };
        self.carries(vlan).then_some(vlan)
    }

    /// Tag to put on a frame of `vlan` leaving this port.
    pub fn egress_tag(&self, vlan: VlanId) -> Option<VlanId> {
        match self {
            VlanMode::Access(_) => None,
            VlanMode::Trunk { native, .. } if *native == vlan => None,
            VlanMode::Trunk { .. } => Some(vlan),
        }
    }

    pub fn is_trunk(&self) -> bool {
        matches!(self, VlanMode::Trunk { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DatalinkInterface {
    pub hardware: HardwareInterface,
    pub mac: MacAddress,
    pub vlan: VlanMode,
    pub stp_state: PortState,
}

impl DatalinkInterface {
    pub fn new(hardware: HardwareInterface, mac: MacAddress) -> Self {
        DatalinkInterface {
            hardware,
            mac,
            vlan: VlanMode::default(),
            stp_state: PortState::Forwarding,
        }
    }
}

/// An address this interface answers for on behalf of a redundancy group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    pub group: u8,
}

#[derive(Debug, Clone)]
pub struct NetworkInterface {
    pub datalink: DatalinkInterface,
    pub address: Option<Ipv4Interface>,
    pub virtual_addresses: Vec<VirtualAddress>,
}

impl NetworkInterface {
    pub fn new(datalink: DatalinkInterface) -> Self {
        NetworkInterface {
            datalink,
            address: None,
            virtual_addresses: Vec::new(),
        }
    }

    pub fn virtual_mac_for(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        self.virtual_addresses.iter().find(|v| v.ip == ip).map(|v| v.mac)
    }
}

#[derive(Debug, Clone)]
pub enum Interface {
    Datalink(DatalinkInterface),
    Network(NetworkInterface),
}

impl Interface {
    pub fn datalink(&self) -> &DatalinkInterface {
        match self {
            Interface::Datalink(d) => d,
            Interface::Network(n) => &n.datalink,
        }
    }

    pub fn datalink_mut(&mut self) -> &mut DatalinkInterface {
        match self {
            Interface::Datalink(d) => d,
            Interface::Network(n) => &mut n.datalink,
        }
    }

    pub fn network(&self) -> Option<&NetworkInterface> {
        match self {
            Interface::Network(n) => Some(n),
            Interface::Datalink(_) => None,
        }
    }

    pub fn network_mut(&mut self) -> Option<&mut NetworkInterface> {
        match self {
            Interface::Network(n) => Some(n),
            Interface::Datalink(_) => None,
        }
    }

    pub fn hardware(&self) -> &HardwareInterface {
        &self.datalink().hardware
    }

    pub fn hardware_mut(&mut self) -> &mut HardwareInterface {
        &mut self.datalink_mut().hardware
    }

    pub fn name(&self) -> &str {
        &self.hardware().name
    }

    pub fn mac(&self) -> MacAddress {
        self.datalink().mac
    }

    pub fn is_up(&self) -> bool {
        self.hardware().admin_up
    }

    pub fn link(&self) -> Option<LinkId> {
        self.hardware().link
    }

    pub fn address(&self) -> Option<Ipv4Interface> {
        self.network().and_then(|n| n.address)
    }

    pub fn virtual_addresses(&self) -> &[VirtualAddress] {
        self.network().map_or(&[], |n| n.virtual_addresses.as_slice())
    }

    /// Whether a frame to `dst` is meant for this interface.
    pub fn accepts_mac(&self, dst: MacAddress) -> bool {
        dst == self.mac()
            || dst.is_broadcast()
            || dst.is_multicast()
            || self.virtual_addresses().iter().any(|v| v.mac == dst)
    }
}

fn split_name(name: &str) -> (String, String) {
    let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    let split = compact
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(compact.len());
    let (alpha, rest) = compact.split_at(split);
    (alpha.to_ascii_lowercase(), rest.to_string())
}

/// Resolve a user-typed interface name such as `gig 0/0`, `Fa0/1` or `eth0`
/// against `names`: an abbreviated type prefix plus an exact number.
pub fn resolve_interface_name<'a, I>(input: &str, names: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let (alpha, rest) = split_name(input);
    if alpha.is_empty() || rest.is_empty() {
        return None;
    }
    let mut found = None;
    for (index, name) in names.into_iter().enumerate() {
        let (cand_alpha, cand_rest) = split_name(name);
        if cand_rest != rest || !cand_alpha.starts_with(&alpha) {
            continue;
        }
        if cand_alpha == alpha {
            return Some(index);
        }
        if found.is_some() {
            return None;
        }
        found = Some(index);
    }
    found
}

/// A node's interfaces, indexed by id in creation order.
#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    entries: BTreeMap<InterfaceId, Interface>,
    next_id: u32,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, interface: Interface) -> Result<InterfaceId, SimError> {
        if self.entries.values().any(|i| i.name().eq_ignore_ascii_case(interface.name())) {
            return Err(SimError::DuplicateInterface(interface.name().to_string()));
        }
        let id = InterfaceId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, interface);
        Ok(id)
    }

    pub fn remove(&mut self, id: InterfaceId) -> Option<Interface> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: InterfaceId) -> Option<&Interface> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: InterfaceId) -> Option<&mut Interface> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: InterfaceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<InterfaceId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InterfaceId, &Interface)> {
        self.entries.iter().map(|(id, i)| (*id, i))
    }

    pub fn resolve(&self, name: &str) -> Option<InterfaceId> {
        let ids: Vec<InterfaceId> = self.entries.keys().copied().collect();
        let index = resolve_interface_name(name, self.entries.values().map(|i| i.name()))?;
        ids.get(index).copied()
    }

    pub fn name_of(&self, id: InterfaceId) -> String {
        self.get(id).map_or_else(|| format!("{:?}", id), |i| i.name().to_string())
    }

    pub fn by_mac(&self, mac: MacAddress) -> Option<InterfaceId> {
        self.iter().find(|(_, i)| i.mac() == mac).map(|(id, _)| id)
    }

    /// Interface configured with `ip` as its primary address.
    pub fn by_ip(&self, ip: Ipv4Addr) -> Option<InterfaceId> {
        self.iter()
            .find(|(_, i)| i.address().map(|a| a.address) == Some(ip))
            .map(|(id, _)| id)
    }

    /// Whether `ip` is a primary or virtual address of any up interface.
    pub fn owns_ip(&self, ip: Ipv4Addr) -> bool {
        self.iter().filter(|(_, i)| i.is_up()).any(|(_, i)| {
            i.address().map(|a| a.address) == Some(ip) || i.virtual_addresses().iter().any(|v| v.ip == ip)
        })
    }

    /// Whether `ip` is the directed broadcast of a connected subnet.
    pub fn is_subnet_broadcast(&self, ip: Ipv4Addr) -> bool {
        self.iter()
            .filter_map(|(_, i)| i.address())
            .any(|a| a.prefix_len < 31 && a.broadcast() == ip)
    }

    /// Up interface whose subnet contains `dst`, longest prefix first.
    pub fn connected(&self, dst: Ipv4Addr) -> Option<(InterfaceId, Ipv4Interface)> {
        self.iter()
            .filter(|(_, i)| i.is_up())
            .filter_map(|(id, i)| i.address().map(|a| (id, a)))
            .filter(|(_, a)| a.contains(dst))
            .max_by_key(|(_, a)| a.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(name: &str, mac_last: u8) -> Interface {
        let hw = HardwareInterface::new(name, 100);
        Interface::Network(NetworkInterface::new(DatalinkInterface::new(
            hw,
            MacAddress::local([0, 0, 0, 0, mac_last]),
        )))
    }

    #[test]
    fn test_name_resolution_accepts_abbreviations() {
        let names = ["GigabitEthernet0/0", "GigabitEthernet0/1", "eth0"];
        assert_eq!(resolve_interface_name("gig 0/1", names), Some(1));
        assert_eq!(resolve_interface_name("g0/0", names), Some(0));
        assert_eq!(resolve_interface_name("GigabitEthernet0/0", names), Some(0));
        assert_eq!(resolve_interface_name("eth0", names), Some(2));
        assert_eq!(resolve_interface_name("gig0/7", names), None);
        assert_eq!(resolve_interface_name("0/0", names), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut table = InterfaceTable::new();
        table.add(network("eth0", 1)).unwrap();
        assert!(matches!(
            table.add(network("ETH0", 2)),
            Err(SimError::DuplicateInterface(_))
        ));
    }

    #[test]
    fn test_connected_lookup_and_ownership() {
        let mut table = InterfaceTable::new();
        let id = table.add(network("eth0", 1)).unwrap();
        let addr = Ipv4Interface::new(Ipv4Addr::new(10, 0, 0, 1), 24).unwrap();
        table.get_mut(id).unwrap().network_mut().unwrap().address = Some(addr);

        assert_eq!(table.connected(Ipv4Addr::new(10, 0, 0, 9)).map(|(i, _)| i), Some(id));
        assert!(table.connected(Ipv4Addr::new(10, 0, 1, 9)).is_none());
        assert!(table.owns_ip(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(table.is_subnet_broadcast(Ipv4Addr::new(10, 0, 0, 255)));

        table.get_mut(id).unwrap().hardware_mut().admin_up = false;
        assert!(!table.owns_ip(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_vlan_mode_tagging() {
        let access = VlanMode::Access(10);
        assert_eq!(access.ingress_vlan(None), Some(10));
        assert_eq!(access.ingress_vlan(Some(10)), None);
        assert_eq!(access.egress_tag(10), None);

        let mut allowed = BTreeSet::new();
        allowed.insert(1);
        allowed.insert(20);
        let trunk = VlanMode::Trunk {
            allowed: Some(allowed),
            native: 1,
        };
        assert_eq!(trunk.ingress_vlan(None), Some(1));
        assert_eq!(trunk.ingress_vlan(Some(20)), Some(20));
        assert_eq!(trunk.ingress_vlan(Some(30)), None);
        assert_eq!(trunk.egress_tag(1), None);
        assert_eq!(trunk.egress_tag(20), Some(20));
    }
}
