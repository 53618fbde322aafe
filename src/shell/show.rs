//! Rendering for `show` commands and the running configuration.

use crate::datalink::{StpService, SwitchingService};
use crate::device::{DeviceType, DuplexSetting, Interface, InterfaceId, Node, NodeId, PortRef, VlanMode};
use crate::error::ShellError;
use crate::message::{VlanId, DEFAULT_VLAN};
use crate::network::{ArpService, HsrpGroupStatus, HsrpService, OspfService};
use crate::simulator::Simulation;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

type Lines = Result<Vec<String>, ShellError>;

/// `FastEthernet0/1` -> `Fa0/1`; short names pass through.
pub(crate) fn short_name(name: &str) -> String {
    let split = name.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(name.len());
    if split <= 3 {
        return name.to_string();
    }
    format!("{}{}", &name[..2], &name[split..])
}

/// `1,3,4,5,9` -> `1,3-5,9`.
pub(crate) fn format_vlan_list(vlans: &BTreeSet<VlanId>) -> String {
    let mut parts = Vec::new();
    let mut iter = vlans.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if end == start {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(",")
}

fn local_ip(node: &Node, iface: InterfaceId) -> Option<Ipv4Addr> {
    node.interface(iface).ok().and_then(Interface::address).map(|a| a.address)
}

/// Operational status and line protocol of one interface.
fn line_status(sim: &Simulation, port: PortRef) -> (&'static str, &'static str) {
    let Ok(iface) = sim.interface(port) else {
        return ("down", "down");
    };
    if !iface.is_up() {
        return ("administratively down", "down");
    }
    let far_up = iface
        .link()
        .and_then(|id| sim.link(id).ok())
        .and_then(|link| link.other_end(port))
        .and_then(|end| sim.interface(end).ok())
        .map_or(false, Interface::is_up);
    if far_up {
        ("up", "up")
    } else {
        ("down", "down")
    }
}

pub(crate) fn ip_interface_brief(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let mut out = vec![format!(
        "{:<22} {:<15} {:<3} {:<6} {:<21} {}",
        "Interface", "IP-Address", "OK?", "Method", "Status", "Protocol"
    )];
    for (id, iface) in n.interfaces().iter() {
        let (address, method) = match iface.address() {
            Some(a) => (a.address.to_string(), "manual"),
            None => ("unassigned".to_string(), "unset"),
        };
        let (status, protocol) = line_status(sim, PortRef::new(node, id));
        out.push(format!(
            "{:<22} {:<15} {:<3} {:<6} {:<21} {}",
            iface.name(),
            address,
            "YES",
            method,
            status,
            protocol
        ));
    }
    Ok(out)
}

pub(crate) fn ip_route(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let routing = n.routing();
    let mut out = vec![
        "Codes: C - connected, S - static, * - candidate default".to_string(),
        String::new(),
    ];
    match routing.default_gateway() {
        Some(gw) => out.push(format!("Gateway of last resort is {} to network 0.0.0.0", gw)),
        None => out.push("Gateway of last resort is not set".to_string()),
    }
    out.push(String::new());
    let mut connected: Vec<_> = n
        .interfaces()
        .iter()
        .filter(|(_, i)| i.is_up())
        .filter_map(|(_, i)| i.address().map(|a| (a.network(), a.prefix_len, i.name().to_string())))
        .collect();
    connected.sort();
    for (network, prefix_len, name) in connected {
        out.push(format!("C    {}/{} is directly connected, {}", network, prefix_len, name));
    }
    for route in routing.routes() {
        out.push(format!(
            "S    {}/{} [1/0] via {}",
            route.prefix.network(),
            route.prefix.prefix_len,
            route.next_hop
        ));
    }
    if let Some(gw) = routing.default_gateway() {
        out.push(format!("S*   0.0.0.0/0 [1/0] via {}", gw));
    }
    Ok(out)
}

pub(crate) fn arp(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let now = sim.now();
    let arp = sim.service::<ArpService>(node)?;
    let mut rows: Vec<(Ipv4Addr, String, String, String)> = n
        .interfaces()
        .iter()
        .filter(|(_, i)| i.is_up())
        .filter_map(|(_, i)| {
            i.address()
                .map(|a| (a.address, "-".to_string(), i.mac().cisco(), i.name().to_string()))
        })
        .collect();
    for (ip, entry) in arp.entries(now) {
        let age = now.since(entry.learned_at).as_millis() / 60_000;
        rows.push((ip, age.to_string(), entry.mac.cisco(), n.interfaces().name_of(entry.iface)));
    }
    rows.sort();
    let mut out = vec![format!(
        "{:<9} {:<16} {:>9}  {:<15} {:<6} {}",
        "Protocol", "Address", "Age (min)", "Hardware Addr", "Type", "Interface"
    )];
    for (ip, age, mac, name) in rows {
        out.push(format!(
            "{:<9} {:<16} {:>9}  {:<15} {:<6} {}",
            "Internet",
            ip.to_string(),
            age,
            mac,
            "ARPA",
            name
        ));
    }
    Ok(out)
}

pub(crate) fn mac_address_table(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let entries = sim.service::<SwitchingService>(node)?.entries(sim.now());
    let mut out = vec![
        "          Mac Address Table".to_string(),
        "-------------------------------------------".to_string(),
        String::new(),
        "Vlan    Mac Address       Type        Ports".to_string(),
        "----    -----------       --------    -----".to_string(),
    ];
    for (vlan, mac, entry) in &entries {
        out.push(format!(
            "{:>4}    {:<17} {:<11} {}",
            vlan,
            mac.cisco(),
            "DYNAMIC",
            short_name(&n.interfaces().name_of(entry.port))
        ));
    }
    out.push(format!("Total Mac Addresses for this criterion: {}", entries.len()));
    Ok(out)
}

pub(crate) fn vlan_brief(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let vlans = sim.service::<SwitchingService>(node)?.vlans();
    let mut out = vec![
        format!("{:<4} {:<32} {:<9} {}", "VLAN", "Name", "Status", "Ports"),
        format!("{} {} {} {}", "-".repeat(4), "-".repeat(32), "-".repeat(9), "-".repeat(31)),
    ];
    for (id, name) in vlans {
        let ports: Vec<String> = n
            .interfaces()
            .iter()
            .filter(|(_, i)| i.datalink().vlan == VlanMode::Access(*id))
            .map(|(_, i)| short_name(i.name()))
            .collect();
        out.push(format!("{:<4} {:<32} {:<9} {}", id, name, "active", ports.join(", ")));
    }
    Ok(out)
}

pub(crate) fn spanning_tree(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let stp = sim.service::<StpService>(node)?;
    if !stp.enabled() {
        return Ok(vec![format!(
            "Spanning tree instance(s) for vlan {} does not exist.",
            DEFAULT_VLAN
        )]);
    }
    let (hello, max_age, forward_delay) = stp.timers();
    let timers = format!(
        "             Hello Time {:>2} sec  Max Age {:>2} sec  Forward Delay {:>2} sec",
        hello, max_age, forward_delay
    );
    let root = stp.root_id();
    let bridge = stp.bridge_id();
    let mut out = vec![
        format!("VLAN{:04}", DEFAULT_VLAN),
        "  Spanning tree enabled protocol ieee".to_string(),
        format!("  Root ID    Priority    {}", root.priority),
        format!("             Address     {}", root.mac.cisco()),
    ];
    if stp.is_root() {
        out.push("             This bridge is the root".to_string());
    } else {
        out.push(format!("             Cost        {}", stp.root_cost()));
        if let Some(port) = stp.root_port() {
            let number = stp
                .ports()
                .iter()
                .find(|p| p.iface == port)
                .map_or(0, |p| p.id.number());
            out.push(format!(
                "             Port        {} ({})",
                number,
                n.interfaces().name_of(port)
            ));
        }
    }
    out.push(timers.clone());
    out.push(String::new());
    out.push(format!("  Bridge ID  Priority    {}", bridge.priority));
    out.push(format!("             Address     {}", bridge.mac.cisco()));
    out.push(timers);
    out.push(String::new());
    out.push(format!(
        "{:<19} {:<4} {:<3} {:<9} {:<8} {}",
        "Interface", "Role", "Sts", "Cost", "Prio.Nbr", "Type"
    ));
    out.push(format!(
        "{} {} {} {} {} {}",
        "-".repeat(19),
        "-".repeat(4),
        "-".repeat(3),
        "-".repeat(9),
        "-".repeat(8),
        "-".repeat(20)
    ));
    for port in stp.ports() {
        out.push(format!(
            "{:<19} {:<4} {:<3} {:<9} {:<8} {}",
            short_name(&n.interfaces().name_of(port.iface)),
            port.role.to_string(),
            port.state.to_string(),
            port.cost,
            format!("{}.{}", port.id.priority(), port.id.number()),
            "P2p"
        ));
    }
    Ok(out)
}

fn hsrp_groups(sim: &Simulation, node: NodeId) -> Result<Vec<HsrpGroupStatus>, ShellError> {
    let n = sim.node(node)?;
    let hsrp = sim.service::<HsrpService>(node)?;
    Ok(hsrp.groups(sim.now(), |iface| local_ip(n, iface)))
}

fn role_address(address: Option<Ipv4Addr>, local: Option<Ipv4Addr>) -> String {
    match address {
        Some(a) if Some(a) == local => "local".to_string(),
        Some(a) => a.to_string(),
        None => "unknown".to_string(),
    }
}

pub(crate) fn standby(sim: &Simulation, node: NodeId, only: Option<InterfaceId>) -> Lines {
    let n = sim.node(node)?;
    let mut out = Vec::new();
    for g in hsrp_groups(sim, node)? {
        if only.map_or(false, |iface| iface != g.iface) {
            continue;
        }
        out.push(format!("{} - Group {}", n.interfaces().name_of(g.iface), g.group));
        out.push(format!("  State is {}", g.state));
        match g.vip {
            Some(vip) => out.push(format!("  Virtual IP address is {}", vip)),
            None => out.push("  Virtual IP address is not configured".to_string()),
        }
        out.push(format!("  Active virtual MAC address is {}", g.virtual_mac.cisco()));
        out.push(format!("  Hello time {} sec, hold time {} sec", g.hello_secs, g.hold_secs));
        out.push(format!(
            "  Preemption {}",
            if g.preempt { "enabled" } else { "disabled" }
        ));
        out.push(format!("  Active router is {}", role_address(g.active, g.local_ip)));
        out.push(format!("  Standby router is {}", role_address(g.standby, g.local_ip)));
        out.push(format!("  Priority {} (configured {})", g.priority, g.priority));
    }
    Ok(out)
}

pub(crate) fn standby_brief(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let mut out = vec![
        "                     P indicates configured to preempt.".to_string(),
        "                     |".to_string(),
        format!(
            "{:<11} {:<4} {:<3} {} {:<7} {:<15} {:<15} {}",
            "Interface", "Grp", "Pri", "P", "State", "Active", "Standby", "Virtual IP"
        ),
    ];
    for g in hsrp_groups(sim, node)? {
        out.push(format!(
            "{:<11} {:<4} {:<3} {} {:<7} {:<15} {:<15} {}",
            short_name(&n.interfaces().name_of(g.iface)),
            g.group,
            g.priority,
            if g.preempt { "P" } else { " " },
            g.state.to_string(),
            role_address(g.active, g.local_ip),
            role_address(g.standby, g.local_ip),
            g.vip.map_or_else(|| "unknown".to_string(), |v| v.to_string())
        ));
    }
    Ok(out)
}

pub(crate) fn ospf_neighbors(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let ospf = sim.service::<OspfService>(node)?;
    let mut out = vec![format!(
        "{:<15} {:>3}   {:<15} {:<11} {:<15} {}",
        "Neighbor ID", "Pri", "State", "Dead Time", "Address", "Interface"
    )];
    for neighbor in ospf.neighbors(sim.now()) {
        let secs = neighbor.dead_in.as_millis() / 1_000;
        out.push(format!(
            "{:<15} {:>3}   {:<15} {:<11} {:<15} {}",
            neighbor.router_id.to_string(),
            1,
            format!("{}/  -", neighbor.state),
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60),
            neighbor.address.to_string(),
            n.interfaces().name_of(neighbor.iface)
        ));
    }
    Ok(out)
}

fn interface_config(sim: &Simulation, node: &Node, id: InterfaceId, iface: &Interface, out: &mut Vec<String>) -> Result<(), ShellError> {
    out.push(format!("interface {}", iface.name()));
    if node.device_type().is_layer3() {
        match iface.address() {
            Some(a) => out.push(format!(" ip address {} {}", a.address, a.mask())),
            None => out.push(" no ip address".to_string()),
        }
    }
    if node.device_type() == DeviceType::Router {
        let config = &sim.config().hsrp;
        for g in hsrp_groups(sim, node.id())?.into_iter().filter(|g| g.iface == id) {
            if let Some(vip) = g.vip {
                out.push(format!(" standby {} ip {}", g.group, vip));
            }
            if g.hello_secs != config.hello_secs || g.hold_secs != config.hold_secs {
                out.push(format!(" standby {} timers {} {}", g.group, g.hello_secs, g.hold_secs));
            }
            if g.priority != config.priority {
                out.push(format!(" standby {} priority {}", g.group, g.priority));
            }
            if g.preempt {
                out.push(format!(" standby {} preempt", g.group));
            }
        }
    }
    if node.device_type() == DeviceType::Switch {
        match &iface.datalink().vlan {
            VlanMode::Access(vlan) => {
                if *vlan != DEFAULT_VLAN {
                    out.push(format!(" switchport access vlan {}", vlan));
                }
            }
            VlanMode::Trunk { allowed, native } => {
                out.push(" switchport mode trunk".to_string());
                if *native != DEFAULT_VLAN {
                    out.push(format!(" switchport trunk native vlan {}", native));
                }
                if let Some(allowed) = allowed {
                    out.push(format!(" switchport trunk allowed vlan {}", format_vlan_list(allowed)));
                }
            }
        }
        if let Some(cost) = sim.service::<StpService>(node.id())?.port_cost_override(id) {
            out.push(format!(" spanning-tree cost {}", cost));
        }
    }
    let hardware = iface.hardware();
    if hardware.speed_mbps != node.device_type().default_speed_mbps() {
        out.push(format!(" speed {}", hardware.speed_mbps));
    }
    if hardware.duplex != DuplexSetting::Auto {
        out.push(format!(" duplex {}", hardware.duplex));
    }
    if !hardware.admin_up {
        out.push(" shutdown".to_string());
    }
    out.push("!".to_string());
    Ok(())
}

pub(crate) fn running_config(sim: &Simulation, node: NodeId) -> Lines {
    let n = sim.node(node)?;
    let mut out = vec![
        "Building configuration...".to_string(),
        String::new(),
        "Current configuration:".to_string(),
        "!".to_string(),
        format!("hostname {}", n.name()),
        "!".to_string(),
    ];

    if n.device_type() == DeviceType::Switch {
        let stp = sim.service::<StpService>(node)?;
        let switching = sim.service::<SwitchingService>(node)?;
        if !stp.enabled() {
            out.push("no spanning-tree".to_string());
        }
        if stp.bridge_id().priority != sim.config().stp.bridge_priority {
            out.push(format!("spanning-tree priority {}", stp.bridge_id().priority));
        }
        if switching.aging_time() != sim.config().switching.aging_time() {
            out.push(format!(
                "mac address-table aging-time {}",
                switching.aging_time().as_millis() / 1_000
            ));
        }
        for (id, name) in switching.vlans().iter().filter(|(id, _)| **id != DEFAULT_VLAN) {
            if *name == format!("VLAN{:04}", id) {
                out.push(format!("vlan {}", id));
            } else {
                out.push(format!("vlan {} name {}", id, name));
            }
        }
        out.push("!".to_string());
    }

    for (id, iface) in n.interfaces().iter() {
        interface_config(sim, n, id, iface, &mut out)?;
    }

    if n.device_type() == DeviceType::Router {
        let ospf = sim.service::<OspfService>(node)?;
        if let Some(pid) = ospf.process_id() {
            out.push(format!("router ospf {}", pid));
            if let Some(router_id) = ospf.configured_router_id() {
                out.push(format!(" router-id {}", router_id));
            }
            for statement in ospf.networks() {
                out.push(format!(
                    " network {} {} area {}",
                    statement.network, statement.wildcard, statement.area
                ));
            }
            out.push("!".to_string());
        }
    }

    if n.device_type().is_layer3() {
        if let Some(gw) = n.routing().default_gateway() {
            out.push(format!("ip default-gateway {}", gw));
        }
        for route in n.routing().routes() {
            out.push(format!(
                "ip route {} {} {}",
                route.prefix.network(),
                route.prefix.mask(),
                route.next_hop
            ));
        }
        let timeout = sim.service::<ArpService>(node)?.timeout();
        if timeout.as_millis() / 1_000 != sim.config().arp.timeout_secs {
            out.push(format!("arp timeout {}", timeout.as_millis() / 1_000));
        }
        out.push("!".to_string());
    }
    out.push("end".to_string());
    Ok(out)
}
