//! Devices, their interfaces, and the links between them.

mod context;
mod interface;
mod link;
mod node;

pub use context::{Action, NodeContext};
pub(crate) use context::PendingAction;
pub use interface::{
    resolve_interface_name, DatalinkInterface, DuplexSetting, HardwareInterface, Interface,
    InterfaceTable, NetworkInterface, PortState, VirtualAddress, VlanMode,
};
pub use link::{Duplex, Link};
pub use node::Node;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Index of an interface within its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u32);

/// One end of a link: an interface on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub iface: InterfaceId,
}

impl PortRef {
    pub fn new(node: NodeId, iface: InterfaceId) -> Self {
        PortRef { node, iface }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Host,
    Router,
    Switch,
}

impl DeviceType {
    /// Long form used for generated interface names.
    pub fn interface_prefix(&self) -> &'static str {
        match self {
            DeviceType::Host => "eth",
            DeviceType::Router => "GigabitEthernet0/",
            DeviceType::Switch => "FastEthernet0/",
        }
    }

    /// Number of the first generated interface.
    pub fn first_interface_number(&self) -> u32 {
        match self {
            DeviceType::Switch => 1,
            DeviceType::Host | DeviceType::Router => 0,
        }
    }

    pub fn default_interface_count(&self) -> usize {
        match self {
            DeviceType::Host => 1,
            DeviceType::Router => 2,
            DeviceType::Switch => 8,
        }
    }

    pub fn default_speed_mbps(&self) -> u32 {
        match self {
            DeviceType::Router => 1000,
            DeviceType::Host | DeviceType::Switch => 100,
        }
    }

    /// Whether interfaces carry IP addresses.
    pub fn is_layer3(&self) -> bool {
        !matches!(self, DeviceType::Switch)
    }

    pub fn interface_name(&self, index: usize) -> String {
        format!(
            "{}{}",
            self.interface_prefix(),
            self.first_interface_number() as usize + index
        )
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Host => "host",
            DeviceType::Router => "router",
            DeviceType::Switch => "switch",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "pc" => Ok(DeviceType::Host),
            "router" => Ok(DeviceType::Router),
            "switch" => Ok(DeviceType::Switch),
            other => Err(format!("unknown device type '{}'", other)),
        }
    }
}
