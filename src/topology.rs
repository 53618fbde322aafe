//! Topology import and export.
//!
//! A `TopologyDescription` lists devices (with interfaces, addresses and
//! shell configuration lines) and links. Building one is all-or-nothing:
//! the graph is assembled in a fresh `Simulation` that is only handed back
//! once every device, link and configuration line has been applied.

use crate::config::SimulationConfig;
use crate::device::{DeviceType, DuplexSetting, NodeId, PortRef};
use crate::error::{SimError, TopologyError};
use crate::message::Ipv4Interface;
use crate::shell::{self, Shell};
use crate::simulator::{Simulation, WallClock};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

fn default_length() -> f64 {
    1.0
}

/// Interface settings an `InterfaceDescription` already carries.
const DESCRIBED_FIELDS: [&str; 5] = [" ip address ", " no ip address", " speed ", " duplex ", " shutdown"];

/// Reduce `show running-config` output to the lines a description does not
/// already hold. An interface header is kept only when something follows it.
fn replayable(running: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut header: Option<String> = None;
    let mut in_interface = false;
    for line in running.into_iter().skip_while(|l| l != "Current configuration:").skip(1) {
        if line == "!" || line == "end" || line.starts_with("hostname ") || line.starts_with("ip default-gateway ") {
            continue;
        }
        if line.starts_with("interface ") {
            header = Some(line);
            in_interface = true;
            continue;
        }
        if !line.starts_with(' ') {
            header = None;
            in_interface = false;
        } else if in_interface {
            if DESCRIBED_FIELDS.iter().any(|field| line.starts_with(field)) {
                continue;
            }
            out.extend(header.take());
        }
        out.push(line);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub name: String,
    /// CIDR form, e.g. `10.0.0.1/24`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplex: Option<DuplexSetting>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Number of generated interfaces; the device type's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<usize>,
    /// Interfaces to configure; names that do not exist yet are created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gateway: Option<Ipv4Addr>,
    /// Shell lines run in global configuration mode after the interfaces are set up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub device: String,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDescription {
    pub a: Endpoint,
    pub b: Endpoint,
    #[serde(default = "default_length")]
    pub length_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mbps: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyDescription {
    #[serde(default)]
    pub devices: Vec<DeviceDescription>,
    #[serde(default)]
    pub links: Vec<LinkDescription>,
}

fn parse_cidr(text: &str) -> Result<Ipv4Interface, SimError> {
    let invalid = || SimError::InvalidAddress(text.to_string());
    let (ip, prefix) = text.split_once('/').ok_or_else(invalid)?;
    let ip: Ipv4Addr = ip.trim().parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
    Ipv4Interface::new(ip, prefix)
}

impl TopologyDescription {
    pub fn from_json(text: &str) -> Result<Self, TopologyError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, TopologyError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a `.toml` or `.json` file; other extensions are tried as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&text),
            _ => Self::from_json(&text),
        }
    }

    pub fn to_json(&self) -> Result<String, TopologyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Snapshot a simulation: devices, addressing and cabling, plus each
    /// device's running configuration as replayable config lines.
    pub fn capture(sim: &Simulation) -> Result<Self, TopologyError> {
        let mut devices = Vec::new();
        for node in sim.nodes() {
            let running = shell::running_config(sim, node.id()).map_err(|error| TopologyError::Config {
                device: node.name().to_string(),
                line: 0,
                error,
            })?;
            devices.push(DeviceDescription {
                name: node.name().to_string(),
                device_type: node.device_type(),
                // Every interface is listed below, so none are generated.
                ports: Some(0),
                interfaces: node
                    .interfaces()
                    .iter()
                    .map(|(_, iface)| {
                        let hardware = iface.hardware();
                        InterfaceDescription {
                            name: iface.name().to_string(),
                            address: iface.address().map(|a| a.to_string()),
                            speed_mbps: (hardware.speed_mbps != node.device_type().default_speed_mbps())
                                .then_some(hardware.speed_mbps),
                            duplex: (hardware.duplex != DuplexSetting::Auto).then_some(hardware.duplex),
                            shutdown: !hardware.admin_up,
                        }
                    })
                    .collect(),
                default_gateway: node.routing().default_gateway(),
                config: replayable(running),
            });
        }
        let endpoint = |port: PortRef| {
            let node = sim.node(port.node).ok()?;
            let iface = node.interface(port.iface).ok()?;
            Some(Endpoint {
                device: node.name().to_string(),
                interface: iface.name().to_string(),
            })
        };
        let links = sim
            .links()
            .filter_map(|link| {
                let [a, b] = link.ends();
                Some(LinkDescription {
                    a: endpoint(a)?,
                    b: endpoint(b)?,
                    length_m: link.length_m(),
                    speed_mbps: link.speed_mbps(),
                })
            })
            .collect();
        Ok(TopologyDescription { devices, links })
    }

    /// Build into a fresh stepped simulation.
    pub fn build(&self, config: SimulationConfig) -> Result<Simulation, TopologyError> {
        let mut sim = Simulation::stepped(config);
        self.populate(&mut sim)?;
        Ok(sim)
    }

    /// Build into a fresh simulation driven by `wall`.
    pub fn build_with_wall_clock(
        &self,
        config: SimulationConfig,
        wall: Arc<dyn WallClock>,
    ) -> Result<Simulation, TopologyError> {
        let mut sim = Simulation::with_wall_clock(config, wall);
        self.populate(&mut sim)?;
        Ok(sim)
    }

    fn populate(&self, sim: &mut Simulation) -> Result<(), TopologyError> {
        let mut created = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            created.push(self.add_device(sim, device)?);
        }
        for link in &self.links {
            let a = self.endpoint(sim, &link.a)?;
            let b = self.endpoint(sim, &link.b)?;
            let id = sim.connect(a, b, link.length_m)?;
            if link.speed_mbps.is_some() {
                sim.set_link_speed(id, link.speed_mbps)?;
            }
        }
        for (device, node) in self.devices.iter().zip(created) {
            Self::run_config(sim, device, node)?;
        }
        info!(
            devices = self.devices.len(),
            links = self.links.len(),
            "topology imported"
        );
        Ok(())
    }

    fn add_device(&self, sim: &mut Simulation, device: &DeviceDescription) -> Result<NodeId, TopologyError> {
        let ports = device.ports.unwrap_or_else(|| device.device_type.default_interface_count());
        let node = sim.add_node_with_ports(&device.name, device.device_type, ports)?;
        for described in &device.interfaces {
            let iface = match sim.node(node)?.interfaces().resolve(&described.name) {
                Some(iface) => iface,
                None => sim.add_interface(node, Some(&described.name))?,
            };
            if let Some(address) = &described.address {
                sim.set_interface_address(node, iface, Some(parse_cidr(address)?))?;
            }
            if let Some(speed) = described.speed_mbps {
                sim.set_interface_speed(node, iface, speed)?;
            }
            if let Some(duplex) = described.duplex {
                sim.set_interface_duplex(node, iface, duplex)?;
            }
            if described.shutdown {
                sim.set_interface_up(node, iface, false)?;
            }
        }
        if let Some(gateway) = device.default_gateway {
            sim.routing_mut(node)?.set_default_gateway(Some(gateway));
        }
        debug!(device = %device.name, ports, "device imported");
        Ok(node)
    }

    fn endpoint(&self, sim: &Simulation, end: &Endpoint) -> Result<PortRef, TopologyError> {
        let node = sim
            .node_by_name(&end.device)
            .ok_or_else(|| TopologyError::UnknownDevice(end.device.clone()))?;
        let iface = sim
            .node(node)?
            .interfaces()
            .resolve(&end.interface)
            .ok_or_else(|| TopologyError::UnknownInterface {
                device: end.device.clone(),
                interface: end.interface.clone(),
            })?;
        Ok(PortRef::new(node, iface))
    }

    fn run_config(sim: &mut Simulation, device: &DeviceDescription, node: NodeId) -> Result<(), TopologyError> {
        if device.config.is_empty() {
            return Ok(());
        }
        let mut shell = Shell::new(sim, node).map_err(|error| TopologyError::Config {
            device: device.name.clone(),
            line: 0,
            error,
        })?;
        let preamble = ["enable", "configure terminal"];
        shell
            .exec_script(sim, preamble)
            .map_err(|(_, error)| TopologyError::Config {
                device: device.name.clone(),
                line: 0,
                error,
            })?;
        shell
            .exec_script(sim, device.config.iter().map(String::as_str))
            .map_err(|(line, error)| TopologyError::Config {
                device: device.name.clone(),
                line,
                error,
            })?;
        Ok(())
    }
}
