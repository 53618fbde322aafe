//! Command registration per device type, and execution.
//!
//! Every handler validates its arguments before the first mutation, so a
//! rejected line has no effect on the simulation.

use super::show;
use super::tree::{Arg, CommandTree, Param};
use super::{Cmd, Invocation, Mode, ModeRoots, Shell};
use crate::datalink::{StpService, SwitchingService};
use crate::device::{DeviceType, DuplexSetting, InterfaceId, NodeId, PortRef, VlanMode};
use crate::error::ShellError;
use crate::message::{Ipv4Interface, VlanId, DEFAULT_VLAN, MAX_VLAN};
use crate::network::{ArpService, EchoOutcome, HsrpService, NetworkStatement, OspfService, StaticRoute};
use crate::simulator::{Duration, Simulation};
use futures::channel::oneshot;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

const PING_COUNT: usize = 5;
const PING_STEP: Duration = Duration(1_000);
const SPEEDS: [u64; 4] = [10, 100, 1_000, 10_000];
const BRIDGE_PRIORITY_STEP: u64 = 4096;

const VLAN_RANGE: Param = Param::Number {
    min: 1,
    max: MAX_VLAN as u64,
};

/// Build the command trees for one device type.
pub(crate) fn build_tree(device: DeviceType) -> (CommandTree, ModeRoots) {
    let mut t = CommandTree::new();
    let roots = ModeRoots {
        user: t.root(),
        privileged: t.root(),
        global: t.root(),
        interface: t.root(),
        router: t.root(),
    };

    for root in [roots.user, roots.privileged] {
        exec_commands(&mut t, root, device);
    }
    let enable = t.keyword(roots.user, "enable", "Turn on privileged commands");
    t.action(enable, Cmd::Enable, false);
    privileged_commands(&mut t, roots.privileged, device);
    global_commands(&mut t, roots.global, device);
    interface_commands(&mut t, roots.interface, device);
    if device == DeviceType::Router {
        router_commands(&mut t, roots.router);
    }
    for root in [roots.global, roots.interface, roots.router] {
        let exit = t.keyword(root, "exit", "Exit from the current mode");
        t.action(exit, Cmd::Exit, false);
        let end = t.keyword(root, "end", "Exit to privileged EXEC mode");
        t.action(end, Cmd::End, false);
    }
    (t, roots)
}

fn exec_commands(t: &mut CommandTree, root: super::CommandId, device: DeviceType) {
    let exit = t.keyword(root, "exit", "Exit from the EXEC");
    t.action(exit, Cmd::Exit, false);

    let show = t.keyword(root, "show", "Show running system information");
    let clock = t.keyword(show, "clock", "Display the system clock");
    t.action(clock, Cmd::ShowClock, false);
    let ip = t.keyword(show, "ip", "IP information");
    let ip_int = t.keyword(ip, "interface", "IP interface status and configuration");
    let brief = t.keyword(ip_int, "brief", "Brief summary of IP status and configuration");
    t.action(brief, Cmd::ShowIpInterfaceBrief, false);

    if device.is_layer3() {
        let ping = t.keyword(root, "ping", "Send echo messages");
        let target = t.param(ping, "address", Param::Ipv4, "Ping destination address");
        t.action(target, Cmd::Ping, false);
        let route = t.keyword(ip, "route", "IP routing table");
        t.action(route, Cmd::ShowIpRoute, false);
        let arp = t.keyword(show, "arp", "ARP table");
        t.action(arp, Cmd::ShowArp, false);
    }

    if device == DeviceType::Switch {
        let mac = t.keyword(show, "mac", "MAC configuration");
        let table = t.keyword(mac, "address-table", "MAC forwarding table");
        t.action(table, Cmd::ShowMacAddressTable, false);
        let vlan = t.keyword(show, "vlan", "VLAN information");
        let brief = t.keyword(vlan, "brief", "VTP all VLAN status in brief");
        t.action(brief, Cmd::ShowVlanBrief, false);
        let stp = t.keyword(show, "spanning-tree", "Spanning tree topology");
        t.action(stp, Cmd::ShowSpanningTree, false);
    }

    if device == DeviceType::Router {
        let standby = t.keyword(show, "standby", "Hot standby protocol information");
        t.action(standby, Cmd::ShowStandby, false);
        let brief = t.keyword(standby, "brief", "Brief output");
        t.action(brief, Cmd::ShowStandbyBrief, false);
        let iface = t.param(standby, "interface", Param::Interface, "Interface name");
        t.action(iface, Cmd::ShowStandby, false);
        let ospf = t.keyword(ip, "ospf", "OSPF information");
        let neighbor = t.keyword(ospf, "neighbor", "Neighbor list");
        t.action(neighbor, Cmd::ShowIpOspfNeighbor, false);
    }
}

fn privileged_commands(t: &mut CommandTree, root: super::CommandId, device: DeviceType) {
    let disable = t.keyword(root, "disable", "Turn off privileged commands");
    t.action(disable, Cmd::Disable, false);
    let configure = t.keyword(root, "configure", "Enter configuration mode");
    let terminal = t.keyword(configure, "terminal", "Configure from the terminal");
    t.action(terminal, Cmd::ConfigureTerminal, false);

    let show = t.keyword(root, "show", "Show running system information");
    let running = t.keyword(show, "running-config", "Current operating configuration");
    t.action(running, Cmd::ShowRunningConfig, false);

    let clear = t.keyword(root, "clear", "Reset functions");
    if device == DeviceType::Switch {
        let mac = t.keyword(clear, "mac", "MAC forwarding table");
        let table = t.keyword(mac, "address-table", "MAC forwarding table");
        t.action(table, Cmd::ClearMacAddressTable, false);
    } else {
        let arp = t.keyword(clear, "arp-cache", "Clear the entire ARP cache");
        t.action(arp, Cmd::ClearArpCache, false);
    }
}

fn global_commands(t: &mut CommandTree, root: super::CommandId, device: DeviceType) {
    let hostname = t.keyword(root, "hostname", "Set system's network name");
    let name = t.param(hostname, "name", Param::Word, "This system's network name");
    t.action(name, Cmd::Hostname, false);

    let interface = t.keyword(root, "interface", "Select an interface to configure");
    let name = t.param(interface, "name", Param::Interface, "Interface name");
    t.action(name, Cmd::Interface, false);

    if device.is_layer3() {
        let ip = t.keyword(root, "ip", "Global IP configuration subcommands");
        let gateway = t.keyword(ip, "default-gateway", "Specify default gateway");
        t.action(gateway, Cmd::IpDefaultGateway, true);
        let address = t.param(gateway, "address", Param::Ipv4, "IP address of default gateway");
        t.action(address, Cmd::IpDefaultGateway, true);

        let route = t.keyword(ip, "route", "Establish static routes");
        let prefix = t.param(route, "prefix", Param::Ipv4, "Destination prefix");
        let mask = t.param(prefix, "mask", Param::Ipv4, "Destination prefix mask");
        t.action(mask, Cmd::IpRoute, true);
        let next_hop = t.param(mask, "next-hop", Param::Ipv4, "Forwarding router's address");
        t.action(next_hop, Cmd::IpRoute, true);

        let arp = t.keyword(root, "arp", "Set ARP parameters");
        let timeout = t.keyword(arp, "timeout", "Set ARP cache timeout");
        t.action(timeout, Cmd::ArpTimeout, true);
        let secs = t.param(timeout, "seconds", Param::Number { min: 1, max: 2_147_483 }, "Seconds");
        t.action(secs, Cmd::ArpTimeout, true);
    }

    if device == DeviceType::Switch {
        let vlan = t.keyword(root, "vlan", "VLAN commands");
        let ids = t.param(vlan, "vlan-ids", Param::VlanList, "ISL VLAN IDs 1-4094");
        t.action(ids, Cmd::Vlan, true);
        let name_kw = t.keyword(ids, "name", "Ascii name of the VLAN");
        let name = t.param(name_kw, "name", Param::Word, "The ascii name for the VLAN");
        t.action(name, Cmd::Vlan, false);

        let stp = t.keyword(root, "spanning-tree", "Spanning Tree Subsystem");
        t.action(stp, Cmd::SpanningTree, true);
        let priority = t.keyword(stp, "priority", "Set the bridge priority for the spanning tree");
        t.action(priority, Cmd::SpanningTreePriority, true);
        let value = t.param(priority, "priority", Param::Number { min: 0, max: 61_440 }, "Bridge priority in increments of 4096");
        t.action(value, Cmd::SpanningTreePriority, true);

        let mac = t.keyword(root, "mac", "MAC configuration");
        let table = t.keyword(mac, "address-table", "Configure the MAC address table");
        let aging = t.keyword(table, "aging-time", "Set MAC address table entry maximum age");
        t.action(aging, Cmd::MacAddressTableAgingTime, true);
        let secs = t.param(aging, "seconds", Param::Number { min: 10, max: 1_000_000 }, "Aging time in seconds");
        t.action(secs, Cmd::MacAddressTableAgingTime, true);
    }

    if device == DeviceType::Router {
        let router = t.keyword(root, "router", "Enable a routing process");
        let ospf = t.keyword(router, "ospf", "Open Shortest Path First (OSPF)");
        let pid = t.param(ospf, "process-id", Param::Number { min: 1, max: 65_535 }, "Process ID");
        t.action(pid, Cmd::RouterOspf, true);
    }
}

fn interface_commands(t: &mut CommandTree, root: super::CommandId, device: DeviceType) {
    let shutdown = t.keyword(root, "shutdown", "Shutdown the selected interface");
    t.action(shutdown, Cmd::Shutdown, true);

    let speed = t.keyword(root, "speed", "Configure speed operation");
    t.action(speed, Cmd::Speed, true);
    let mbps = t.param(speed, "mbps", Param::Number { min: 10, max: 10_000 }, "Speed in Mbps");
    t.action(mbps, Cmd::Speed, true);

    let duplex = t.keyword(root, "duplex", "Configure duplex operation");
    t.action(duplex, Cmd::Duplex, true);
    for (word, help) in [
        ("auto", "Enable AUTO duplex configuration"),
        ("full", "Force full duplex operation"),
        ("half", "Force half-duplex operation"),
    ] {
        let setting = t.keyword(duplex, word, help);
        t.action(setting, Cmd::Duplex, true);
    }

    if device.is_layer3() {
        let ip = t.keyword(root, "ip", "Interface Internet Protocol config commands");
        let address = t.keyword(ip, "address", "Set the IP address of an interface");
        t.action(address, Cmd::IpAddress, true);
        let ip_addr = t.param(address, "address", Param::Ipv4, "IP address");
        let mask = t.param(ip_addr, "mask", Param::Ipv4, "IP subnet mask");
        t.action(mask, Cmd::IpAddress, true);
    }

    if device == DeviceType::Switch {
        let switchport = t.keyword(root, "switchport", "Set switching mode characteristics");
        let mode = t.keyword(switchport, "mode", "Set trunking mode of the interface");
        t.action(mode, Cmd::SwitchportMode, true);
        for (word, help) in [
            ("access", "Set trunking mode to ACCESS unconditionally"),
            ("trunk", "Set trunking mode to TRUNK unconditionally"),
        ] {
            let setting = t.keyword(mode, word, help);
            t.action(setting, Cmd::SwitchportMode, true);
        }

        let access = t.keyword(switchport, "access", "Set access mode characteristics of the interface");
        let vlan = t.keyword(access, "vlan", "Set VLAN when interface is in access mode");
        t.action(vlan, Cmd::SwitchportAccessVlan, true);
        let id = t.param(vlan, "vlan-id", VLAN_RANGE, "VLAN ID of the VLAN when this port is in access mode");
        t.action(id, Cmd::SwitchportAccessVlan, true);

        let trunk = t.keyword(switchport, "trunk", "Set trunking characteristics of the interface");
        let allowed = t.keyword(trunk, "allowed", "Set allowed VLAN characteristics when interface is in trunking mode");
        let vlan = t.keyword(allowed, "vlan", "Set allowed VLANs when interface is in trunking mode");
        t.action(vlan, Cmd::SwitchportTrunkAllowedVlan, true);
        let all = t.keyword(vlan, "all", "All VLANs");
        t.action(all, Cmd::SwitchportTrunkAllowedVlan, false);
        let list = t.param(vlan, "vlan-ids", Param::VlanList, "VLAN IDs of the allowed VLANs");
        t.action(list, Cmd::SwitchportTrunkAllowedVlan, true);
        let native = t.keyword(trunk, "native", "Set trunking native characteristics");
        let vlan = t.keyword(native, "vlan", "Set native VLAN when interface is in trunking mode");
        t.action(vlan, Cmd::SwitchportTrunkNativeVlan, true);
        let id = t.param(vlan, "vlan-id", VLAN_RANGE, "VLAN ID of the native VLAN");
        t.action(id, Cmd::SwitchportTrunkNativeVlan, true);

        let stp = t.keyword(root, "spanning-tree", "Spanning Tree Subsystem");
        let cost = t.keyword(stp, "cost", "Change an interface's spanning tree port path cost");
        t.action(cost, Cmd::SpanningTreeCost, true);
        let value = t.param(cost, "cost", Param::Number { min: 1, max: 200_000_000 }, "Port path cost");
        t.action(value, Cmd::SpanningTreeCost, true);
    }

    if device == DeviceType::Router {
        let standby = t.keyword(root, "standby", "HSRP interface configuration commands");
        let group = t.param(standby, "group", Param::Number { min: 0, max: 255 }, "Group number");
        t.action(group, Cmd::StandbyGroup, true);

        let ip = t.keyword(group, "ip", "Enable HSRP and set the virtual IP address");
        t.action(ip, Cmd::StandbyIp, true);
        let vip = t.param(ip, "address", Param::Ipv4, "Virtual IP address");
        t.action(vip, Cmd::StandbyIp, true);

        let priority = t.keyword(group, "priority", "Priority level");
        t.action(priority, Cmd::StandbyPriority, true);
        let level = t.param(priority, "level", Param::Number { min: 0, max: 255 }, "Priority value");
        t.action(level, Cmd::StandbyPriority, true);

        let preempt = t.keyword(group, "preempt", "Overthrow lower priority Active routers");
        t.action(preempt, Cmd::StandbyPreempt, true);

        let timers = t.keyword(group, "timers", "Hello and hold timers");
        t.action(timers, Cmd::StandbyTimers, true);
        let hello = t.param(timers, "hello", Param::Number { min: 1, max: 254 }, "Hello interval in seconds");
        let hold = t.param(hello, "hold", Param::Number { min: 2, max: 255 }, "Hold time in seconds");
        t.action(hold, Cmd::StandbyTimers, true);
    }
}

fn router_commands(t: &mut CommandTree, root: super::CommandId) {
    let router_id = t.keyword(root, "router-id", "router-id for this OSPF process");
    t.action(router_id, Cmd::RouterId, true);
    let id = t.param(router_id, "id", Param::Ipv4, "OSPF router-id in IP address format");
    t.action(id, Cmd::RouterId, true);

    let network = t.keyword(root, "network", "Enable routing on an IP network");
    let address = t.param(network, "address", Param::Ipv4, "Network number");
    let wildcard = t.param(address, "wildcard", Param::Ipv4, "OSPF wild card bits");
    let area = t.keyword(wildcard, "area", "Set the OSPF area ID");
    let id = t.param(area, "area-id", Param::Number { min: 0, max: u32::MAX as u64 }, "OSPF area ID as a decimal value");
    t.action(id, Cmd::Network, true);
}

/// Typed access to the parameters a line matched, counted per kind.
struct Args<'a>(&'a [Arg]);

impl<'a> Args<'a> {
    fn number(&self, n: usize) -> Option<u64> {
        self.0
            .iter()
            .filter_map(|a| match a {
                Arg::Number(v) => Some(*v),
                _ => None,
            })
            .nth(n)
    }

    fn ipv4(&self, n: usize) -> Option<Ipv4Addr> {
        self.0
            .iter()
            .filter_map(|a| match a {
                Arg::Ipv4(ip) => Some(*ip),
                _ => None,
            })
            .nth(n)
    }

    fn word(&self) -> Option<&'a str> {
        self.0.iter().find_map(|a| match a {
            Arg::Word(w) => Some(w.as_str()),
            _ => None,
        })
    }

    fn interface(&self) -> Option<&'a str> {
        self.0.iter().find_map(|a| match a {
            Arg::Interface(name) => Some(name.as_str()),
            _ => None,
        })
    }

    fn vlans(&self) -> Option<&'a BTreeSet<VlanId>> {
        self.0.iter().find_map(|a| match a {
            Arg::VlanList(set) => Some(set),
            _ => None,
        })
    }
}

fn required<T>(value: Option<T>) -> Result<T, ShellError> {
    value.ok_or(ShellError::Incomplete)
}

fn done() -> Result<Vec<String>, ShellError> {
    Ok(Vec::new())
}

fn current_interface(shell: &Shell) -> Result<InterfaceId, ShellError> {
    match shell.mode() {
        Mode::InterfaceConfig(iface) => Ok(iface),
        _ => Err(ShellError::Rejected("not in interface configuration mode".to_string())),
    }
}

fn resolve_interface(sim: &Simulation, node: NodeId, name: &str) -> Result<InterfaceId, ShellError> {
    sim.node(node)?
        .resolve_interface(name)
        .map_err(|_| ShellError::InvalidInput(name.to_string()))
}

fn narrow<T: TryFrom<u64>>(what: &'static str, value: u64) -> Result<T, ShellError> {
    T::try_from(value).map_err(|_| ShellError::InvalidValue {
        what,
        value: value.to_string(),
    })
}

fn with_mask(address: Ipv4Addr, mask: Ipv4Addr) -> Result<Ipv4Interface, ShellError> {
    Ipv4Interface::with_mask(address, mask).map_err(|_| ShellError::InvalidValue {
        what: "subnet mask",
        value: mask.to_string(),
    })
}

pub(crate) fn execute(shell: &mut Shell, sim: &mut Simulation, invocation: &Invocation) -> Result<Vec<String>, ShellError> {
    let node = shell.node();
    let args = Args(&invocation.matched.args);
    let last_keyword = invocation.matched.keywords.last().copied().unwrap_or("");
    let no = invocation.negated;

    match invocation.matched.cmd {
        Cmd::Enable => {
            shell.push_mode(Mode::Privileged);
            done()
        }
        Cmd::Disable => {
            shell.truncate_modes(1);
            done()
        }
        Cmd::ConfigureTerminal => {
            shell.push_mode(Mode::GlobalConfig);
            Ok(vec!["Enter configuration commands, one per line.  End with CNTL/Z.".to_string()])
        }
        Cmd::Exit => {
            shell.exit_mode();
            done()
        }
        Cmd::End => {
            shell.truncate_modes(2);
            done()
        }

        Cmd::Ping => ping(shell, sim, required(args.ipv4(0))?),
        Cmd::ShowClock => Ok(vec![format!("*{} ({})", sim.now().clock_string(), sim.speed())]),
        Cmd::ShowIpInterfaceBrief => show::ip_interface_brief(sim, node),
        Cmd::ShowIpRoute => show::ip_route(sim, node),
        Cmd::ShowArp => show::arp(sim, node),
        Cmd::ShowMacAddressTable => show::mac_address_table(sim, node),
        Cmd::ShowVlanBrief => show::vlan_brief(sim, node),
        Cmd::ShowSpanningTree => show::spanning_tree(sim, node),
        Cmd::ShowStandby => {
            let only = args
                .interface()
                .map(|name| resolve_interface(sim, node, name))
                .transpose()?;
            show::standby(sim, node, only)
        }
        Cmd::ShowStandbyBrief => show::standby_brief(sim, node),
        Cmd::ShowIpOspfNeighbor => show::ospf_neighbors(sim, node),
        Cmd::ShowRunningConfig => show::running_config(sim, node),
        Cmd::ClearMacAddressTable => {
            sim.with_service::<SwitchingService, _, _>(node, |switching, _| switching.clear())?;
            done()
        }
        Cmd::ClearArpCache => {
            sim.with_service::<ArpService, _, _>(node, |arp, _| arp.clear())?;
            done()
        }

        Cmd::Hostname => {
            let name = required(args.word())?;
            let valid = name.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ShellError::InvalidValue {
                    what: "hostname",
                    value: name.to_string(),
                });
            }
            sim.rename_node(node, name)?;
            done()
        }
        Cmd::Interface => {
            let iface = resolve_interface(sim, node, required(args.interface())?)?;
            shell.push_mode(Mode::InterfaceConfig(iface));
            done()
        }
        Cmd::IpDefaultGateway => {
            let gateway = if no { None } else { Some(required(args.ipv4(0))?) };
            sim.routing_mut(node)?.set_default_gateway(gateway);
            done()
        }
        Cmd::IpRoute => {
            let prefix = with_mask(required(args.ipv4(0))?, required(args.ipv4(1))?)?;
            if no {
                if !sim.routing_mut(node)?.remove_route(prefix) {
                    return Err(ShellError::Rejected("No matching route to delete".to_string()));
                }
            } else {
                let next_hop = required(args.ipv4(2))?;
                sim.routing_mut(node)?.add_route(StaticRoute { prefix, next_hop });
            }
            done()
        }
        Cmd::Vlan => vlan(sim, node, required(args.vlans())?, args.word(), no),
        Cmd::SpanningTree => {
            sim.with_service::<StpService, _, _>(node, |stp, ctx| stp.set_enabled(ctx, !no))?;
            done()
        }
        Cmd::SpanningTreePriority => {
            let priority = if no {
                sim.config().stp.bridge_priority
            } else {
                let value = required(args.number(0))?;
                if value % BRIDGE_PRIORITY_STEP != 0 {
                    return Err(ShellError::InvalidValue {
                        what: "bridge priority",
                        value: format!("{} (must be a multiple of {})", value, BRIDGE_PRIORITY_STEP),
                    });
                }
                narrow("bridge priority", value)?
            };
            sim.with_service::<StpService, _, _>(node, |stp, ctx| stp.set_priority(ctx, priority))?;
            done()
        }
        Cmd::MacAddressTableAgingTime => {
            let aging = if no {
                sim.config().switching.aging_time()
            } else {
                Duration::from_secs(required(args.number(0))?)
            };
            sim.with_service::<SwitchingService, _, _>(node, |switching, _| switching.set_aging_time(aging))?;
            done()
        }
        Cmd::ArpTimeout => {
            let secs = if no {
                sim.config().arp.timeout_secs
            } else {
                required(args.number(0))?
            };
            sim.with_service::<ArpService, _, _>(node, |arp, _| arp.set_timeout(Duration::from_secs(secs)))?;
            done()
        }
        Cmd::RouterOspf => {
            let pid: u16 = narrow("process id", required(args.number(0))?)?;
            if no {
                sim.with_service::<OspfService, _, _>(node, |ospf, ctx| ospf.stop_process(ctx, pid))?;
                return done();
            }
            let started = sim.with_service::<OspfService, _, _>(node, |ospf, ctx| ospf.start_process(ctx, pid))?;
            if !started {
                return Err(ShellError::Rejected(format!(
                    "OSPF process {} cannot start: another OSPF process is running",
                    pid
                )));
            }
            shell.push_mode(Mode::RouterConfig(pid));
            done()
        }

        Cmd::IpAddress => {
            let iface = current_interface(shell)?;
            let address = if no {
                None
            } else {
                Some(with_mask(required(args.ipv4(0))?, required(args.ipv4(1))?)?)
            };
            sim.set_interface_address(node, iface, address)?;
            done()
        }
        Cmd::Shutdown => {
            let iface = current_interface(shell)?;
            sim.set_interface_up(node, iface, no)?;
            done()
        }
        Cmd::Speed => {
            let iface = current_interface(shell)?;
            let speed = if no {
                shell.device_type().default_speed_mbps() as u64
            } else {
                required(args.number(0))?
            };
            if !SPEEDS.contains(&speed) {
                return Err(ShellError::InvalidValue {
                    what: "speed",
                    value: speed.to_string(),
                });
            }
            sim.set_interface_speed(node, iface, narrow("speed", speed)?)?;
            done()
        }
        Cmd::Duplex => {
            let iface = current_interface(shell)?;
            let setting = match (no, last_keyword) {
                (false, "full") => DuplexSetting::Full,
                (false, "half") => DuplexSetting::Half,
                (false, "auto") | (true, _) => DuplexSetting::Auto,
                _ => return Err(ShellError::Incomplete),
            };
            sim.set_interface_duplex(node, iface, setting)?;
            done()
        }
        Cmd::SwitchportMode => {
            let iface = current_interface(shell)?;
            let current = vlan_mode(sim, node, iface)?;
            let mode = match (no, last_keyword) {
                (false, "trunk") if current.is_trunk() => current,
                (false, "trunk") => VlanMode::trunk(),
                (false, "access") | (true, _) if !current.is_trunk() => current,
                (false, "access") | (true, _) => VlanMode::default(),
                _ => return Err(ShellError::Incomplete),
            };
            sim.set_vlan_mode(node, iface, mode)?;
            done()
        }
        Cmd::SwitchportAccessVlan => {
            let iface = current_interface(shell)?;
            if vlan_mode(sim, node, iface)?.is_trunk() {
                return Err(ShellError::Rejected("interface is in trunk mode".to_string()));
            }
            let vlan: VlanId = if no {
                DEFAULT_VLAN
            } else {
                narrow("VLAN", required(args.number(0))?)?
            };
            let exists = sim.service::<SwitchingService>(node)?.vlans().contains_key(&vlan);
            let mut output = Vec::new();
            if !exists {
                output.push(format!("% Access VLAN does not exist. Creating vlan {}", vlan));
            }
            sim.set_vlan_mode(node, iface, VlanMode::Access(vlan))?;
            if !exists {
                sim.with_service::<SwitchingService, _, _>(node, |switching, _| switching.create_vlan(vlan, None))?;
            }
            Ok(output)
        }
        Cmd::SwitchportTrunkAllowedVlan => {
            let iface = current_interface(shell)?;
            let VlanMode::Trunk { native, .. } = vlan_mode(sim, node, iface)? else {
                return Err(ShellError::Rejected("interface is not in trunk mode".to_string()));
            };
            let allowed = if no || last_keyword == "all" {
                None
            } else {
                Some(required(args.vlans())?.clone())
            };
            sim.set_vlan_mode(node, iface, VlanMode::Trunk { allowed, native })?;
            done()
        }
        Cmd::SwitchportTrunkNativeVlan => {
            let iface = current_interface(shell)?;
            let VlanMode::Trunk { allowed, .. } = vlan_mode(sim, node, iface)? else {
                return Err(ShellError::Rejected("interface is not in trunk mode".to_string()));
            };
            let native = if no {
                DEFAULT_VLAN
            } else {
                narrow("VLAN", required(args.number(0))?)?
            };
            sim.set_vlan_mode(node, iface, VlanMode::Trunk { allowed, native })?;
            done()
        }
        Cmd::SpanningTreeCost => {
            let iface = current_interface(shell)?;
            let cost = if no {
                None
            } else {
                Some(narrow("path cost", required(args.number(0))?)?)
            };
            sim.with_service::<StpService, _, _>(node, |stp, ctx| stp.set_port_cost(ctx, iface, cost))?;
            done()
        }
        Cmd::StandbyGroup | Cmd::StandbyIp | Cmd::StandbyPriority | Cmd::StandbyPreempt | Cmd::StandbyTimers => {
            standby(shell, sim, invocation.matched.cmd, &args, no)
        }

        Cmd::RouterId => {
            let router_id = if no { None } else { Some(required(args.ipv4(0))?) };
            sim.with_service::<OspfService, _, _>(node, |ospf, _| ospf.set_router_id(router_id))?;
            done()
        }
        Cmd::Network => {
            let network = required(args.ipv4(0))?;
            let wildcard = required(args.ipv4(1))?;
            let area: u32 = narrow("area", required(args.number(0))?)?;
            sim.with_service::<OspfService, _, _>(node, |ospf, _| {
                if no {
                    ospf.remove_network(network, wildcard);
                } else {
                    ospf.add_network(NetworkStatement { network, wildcard, area });
                }
            })?;
            done()
        }
    }
}

fn vlan_mode(sim: &Simulation, node: NodeId, iface: InterfaceId) -> Result<VlanMode, ShellError> {
    Ok(sim.interface(PortRef::new(node, iface))?.datalink().vlan.clone())
}

fn vlan(
    sim: &mut Simulation,
    node: NodeId,
    ids: &BTreeSet<VlanId>,
    name: Option<&str>,
    no: bool,
) -> Result<Vec<String>, ShellError> {
    if no && ids.contains(&DEFAULT_VLAN) {
        return Err(ShellError::Rejected("Default VLAN 1 may not be deleted.".to_string()));
    }
    let existing: BTreeSet<VlanId> = sim.service::<SwitchingService>(node)?.vlans().keys().copied().collect();
    sim.with_service::<SwitchingService, _, _>(node, |switching, _| {
        for &id in ids {
            if no {
                switching.remove_vlan(id);
            } else if name.is_some() || !existing.contains(&id) {
                switching.create_vlan(id, name);
            }
        }
    })?;
    done()
}

fn standby(shell: &Shell, sim: &mut Simulation, cmd: Cmd, args: &Args<'_>, no: bool) -> Result<Vec<String>, ShellError> {
    let node = shell.node();
    let iface = current_interface(shell)?;
    let group: u8 = narrow("group", required(args.number(0))?)?;
    let defaults = sim.config().hsrp.clone();

    match cmd {
        Cmd::StandbyGroup => {
            if !no {
                return Err(ShellError::Incomplete);
            }
            sim.with_service::<HsrpService, _, _>(node, |hsrp, ctx| hsrp.remove_group(ctx, iface, group))?;
        }
        Cmd::StandbyIp => {
            let vip = if no { None } else { Some(required(args.ipv4(0))?) };
            if let Some(vip) = vip {
                let own = sim.interface(PortRef::new(node, iface))?.address();
                if own.map(|a| a.address) == Some(vip) {
                    return Err(ShellError::InvalidValue {
                        what: "virtual address",
                        value: format!("{} is the interface address", vip),
                    });
                }
            }
            sim.with_service::<HsrpService, _, _>(node, |hsrp, ctx| hsrp.set_virtual_ip(ctx, iface, group, vip))?;
        }
        Cmd::StandbyPriority => {
            let priority = if no {
                defaults.priority
            } else {
                narrow("priority", required(args.number(1))?)?
            };
            sim.with_service::<HsrpService, _, _>(node, |hsrp, ctx| hsrp.set_priority(ctx, iface, group, priority))?;
        }
        Cmd::StandbyPreempt => {
            sim.with_service::<HsrpService, _, _>(node, |hsrp, ctx| hsrp.set_preempt(ctx, iface, group, !no))?;
        }
        Cmd::StandbyTimers => {
            let (hello, hold) = if no {
                (defaults.hello_secs, defaults.hold_secs)
            } else {
                let hello: u8 = narrow("hello time", required(args.number(1))?)?;
                let hold: u8 = narrow("hold time", required(args.number(2))?)?;
                if hold <= hello {
                    return Err(ShellError::InvalidValue {
                        what: "hold time",
                        value: format!("{} (must exceed hello time {})", hold, hello),
                    });
                }
                (hello, hold)
            };
            sim.with_service::<HsrpService, _, _>(node, |hsrp, ctx| hsrp.set_timers(ctx, iface, group, hello, hold))?;
        }
        _ => return Err(ShellError::Incomplete),
    }
    done()
}

/// Five echoes sent one after another. A stepped simulation is advanced
/// here until the run completes; otherwise the run is parked on the shell
/// and finished by `Shell::poll_background` as the driver moves time.
fn ping(shell: &mut Shell, sim: &mut Simulation, dst: Ipv4Addr) -> Result<Vec<String>, ShellError> {
    if sim.speed().is_paused() {
        return Err(ShellError::Rejected("simulation is paused".to_string()));
    }
    let node = shell.node();
    let timeout = sim.config().icmp.timeout();
    let mut output = vec![
        "Type escape sequence to abort.".to_string(),
        format!(
            "Sending {}, {}-byte ICMP Echos to {}, timeout is {} seconds:",
            PING_COUNT,
            sim.config().icmp.data_len + 28,
            dst,
            timeout.as_millis() / 1_000
        ),
    ];
    let mut run = PingRun::new(dst);
    if !sim.is_stepped() {
        run.step(sim, node)?;
        shell.ping = Some(run);
        return Ok(output);
    }

    let mut waited = Duration::ZERO;
    loop {
        let answered = run.marks.len();
        if run.step(sim, node)? {
            break;
        }
        if run.marks.len() != answered {
            waited = Duration::ZERO;
        }
        if waited > timeout {
            run.expire();
            continue;
        }
        sim.advance(PING_STEP);
        waited = waited + PING_STEP;
    }
    output.extend(run.summary());
    Ok(output)
}

/// An echo run in progress: one outstanding request at a time.
pub(crate) struct PingRun {
    dst: Ipv4Addr,
    current: Option<oneshot::Receiver<EchoOutcome>>,
    marks: String,
    rtts: Vec<u64>,
}

impl PingRun {
    fn new(dst: Ipv4Addr) -> Self {
        PingRun {
            dst,
            current: None,
            marks: String::with_capacity(PING_COUNT),
            rtts: Vec::with_capacity(PING_COUNT),
        }
    }

    /// Collect whatever has resolved and send the next echo. Returns true
    /// once every echo has an outcome.
    pub(crate) fn step(&mut self, sim: &mut Simulation, node: NodeId) -> Result<bool, ShellError> {
        loop {
            if let Some(rx) = self.current.as_mut() {
                match rx.try_recv() {
                    Ok(None) => return Ok(false),
                    Ok(Some(outcome)) => self.record(Some(outcome)),
                    Err(_) => self.record(None),
                }
                self.current = None;
            }
            if self.marks.len() >= PING_COUNT {
                return Ok(true);
            }
            self.current = Some(sim.ping(node, self.dst)?);
        }
    }

    /// Give up on the outstanding echo.
    fn expire(&mut self) {
        if self.current.take().is_some() {
            self.record(None);
        }
    }

    fn record(&mut self, outcome: Option<EchoOutcome>) {
        match outcome {
            Some(EchoOutcome::Reply { rtt, .. }) => {
                self.marks.push('!');
                self.rtts.push(rtt.as_millis());
            }
            Some(EchoOutcome::TtlExceeded { .. }) => self.marks.push('&'),
            Some(EchoOutcome::Unreachable) | None => self.marks.push('.'),
        }
    }

    pub(crate) fn summary(&self) -> Vec<String> {
        let ok = self.rtts.len();
        let mut summary = format!(
            "Success rate is {} percent ({}/{})",
            ok * 100 / PING_COUNT,
            ok,
            PING_COUNT
        );
        if let (Some(min), Some(max)) = (self.rtts.iter().min(), self.rtts.iter().max()) {
            let avg = self.rtts.iter().sum::<u64>() / ok as u64;
            summary.push_str(&format!(", round-trip min/avg/max = {}/{}/{} ms", min, avg, max));
        }
        vec![self.marks.clone(), summary]
    }
}
