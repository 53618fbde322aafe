//! Hosts, routers and switches.

use super::{
    DatalinkInterface, DeviceType, HardwareInterface, Interface, InterfaceId, InterfaceTable,
    NetworkInterface, NodeId,
};
use crate::error::SimError;
use crate::handler::{Listener, ListenerRegistry};
use crate::message::{Frame, MacAddress};
use crate::network::RoutingTable;

pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) device_type: DeviceType,
    /// Identifies the device itself (bridge id for switches).
    pub(crate) base_mac: MacAddress,
    pub(crate) interfaces: InterfaceTable,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) routing: RoutingTable,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, device_type: DeviceType, base_mac: MacAddress) -> Self {
        Node {
            id,
            name,
            device_type,
            base_mac,
            interfaces: InterfaceTable::new(),
            listeners: ListenerRegistry::new(),
            routing: RoutingTable::default(),
        }
    }

    /// Build an interface of the layer this device type uses.
    pub fn build_interface(device_type: DeviceType, name: String, mac: MacAddress) -> Interface {
        let hardware = HardwareInterface::new(name, device_type.default_speed_mbps());
        let datalink = DatalinkInterface::new(hardware, mac);
        if device_type.is_layer3() {
            Interface::Network(NetworkInterface::new(datalink))
        } else {
            Interface::Datalink(datalink)
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn base_mac(&self) -> MacAddress {
        self.base_mac
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    pub fn interface(&self, iface: InterfaceId) -> Result<&Interface, SimError> {
        self.interfaces.get(iface).ok_or(SimError::UnknownInterface {
            node: self.id,
            iface,
        })
    }

    pub fn resolve_interface(&self, name: &str) -> Result<InterfaceId, SimError> {
        self.interfaces
            .resolve(name)
            .ok_or_else(|| SimError::UnknownInterfaceName {
                node: self.id,
                name: name.to_string(),
            })
    }

    /// Next free generated interface name for this device type.
    pub fn next_interface_name(&self) -> String {
        (0..)
            .map(|index| self.device_type.interface_name(index))
            .find(|name| self.interfaces.resolve(name).is_none())
            .unwrap_or_default()
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.names()
    }

    pub fn service<T: Listener>(&self) -> Option<&T> {
        self.listeners.find::<T>()
    }

    /// Receive-side address filter. Switches take everything; hosts and
    /// routers take untagged frames for their own, virtual, broadcast or
    /// multicast addresses.
    pub fn accepts_frame(&self, iface: InterfaceId, frame: &Frame) -> bool {
        if self.device_type == DeviceType::Switch {
            return true;
        }
        if frame.vlan().is_some() {
            return false;
        }
        self.interfaces
            .get(iface)
            .map_or(false, |i| i.accepts_mac(frame.dst()))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("device_type", &self.device_type)
            .field("interfaces", &self.interfaces.len())
            .field("listeners", &self.listeners.names())
            .finish()
    }
}
