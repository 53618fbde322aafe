//! IOS-style command shell bound to one device.
//!
//! A `Shell` owns the device's command tree and its mode stack. `exec`
//! resolves a whole line against the current mode before touching the
//! simulation, so a line that fails leaves both the device and the mode
//! unchanged.
//!
//! Inside interface and router configuration a line the sub-mode does not
//! know is retried against global configuration; if it matches there, the
//! sub-mode is left first, as on real equipment.

mod commands;
mod show;
pub mod tree;

pub use tree::{parse_vlan_list, Arg, CommandId, CommandTree, Matched, Param};

use crate::device::{DeviceType, InterfaceId, NodeId};
use crate::error::ShellError;
use crate::simulator::Simulation;
use tracing::debug;

/// `show running-config` output for `node`, banner included.
pub(crate) fn running_config(sim: &Simulation, node: NodeId) -> Result<Vec<String>, ShellError> {
    show::running_config(sim, node)
}

/// Every command the shell can run.
///
/// # Categories
///
/// - **Navigation**: ENABLE, DISABLE, CONFIGURE TERMINAL, EXIT, END
/// - **Diagnostics**: PING and the SHOW family
/// - **Device config**: HOSTNAME, INTERFACE, IP ROUTE, VLAN, SPANNING-TREE
/// - **Interface config**: IP ADDRESS, SHUTDOWN, SPEED, DUPLEX, SWITCHPORT, STANDBY
/// - **Router config**: ROUTER OSPF, ROUTER-ID, NETWORK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmd {
    // Navigation
    Enable,
    Disable,
    ConfigureTerminal,
    Exit,
    End,
    // Diagnostics
    Ping,
    ShowClock,
    ShowIpInterfaceBrief,
    ShowIpRoute,
    ShowArp,
    ShowMacAddressTable,
    ShowVlanBrief,
    ShowSpanningTree,
    /// `show standby [<iface>]`
    ShowStandby,
    ShowStandbyBrief,
    ShowIpOspfNeighbor,
    ShowRunningConfig,
    ClearMacAddressTable,
    ClearArpCache,
    // Global configuration
    Hostname,
    Interface,
    IpDefaultGateway,
    /// `ip route <network> <mask> <next-hop>`
    IpRoute,
    /// `vlan <list> [name <word>]`
    Vlan,
    SpanningTree,
    SpanningTreePriority,
    MacAddressTableAgingTime,
    ArpTimeout,
    RouterOspf,
    // Interface configuration
    IpAddress,
    Shutdown,
    Speed,
    Duplex,
    SwitchportMode,
    SwitchportAccessVlan,
    SwitchportTrunkAllowedVlan,
    SwitchportTrunkNativeVlan,
    SpanningTreeCost,
    /// `no standby <g>` only
    StandbyGroup,
    StandbyIp,
    StandbyPriority,
    StandbyPreempt,
    StandbyTimers,
    // Router configuration
    RouterId,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User,
    Privileged,
    GlobalConfig,
    InterfaceConfig(InterfaceId),
    RouterConfig(u16),
}

impl Mode {
    pub fn is_config(&self) -> bool {
        !matches!(self, Mode::User | Mode::Privileged)
    }

    pub fn is_sub_config(&self) -> bool {
        matches!(self, Mode::InterfaceConfig(_) | Mode::RouterConfig(_))
    }

    fn prompt_suffix(&self) -> &'static str {
        match self {
            Mode::User => ">",
            Mode::Privileged => "#",
            Mode::GlobalConfig => "(config)#",
            Mode::InterfaceConfig(_) => "(config-if)#",
            Mode::RouterConfig(_) => "(config-router)#",
        }
    }
}

/// Roots of the per-mode command trees.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModeRoots {
    pub user: CommandId,
    pub privileged: CommandId,
    pub global: CommandId,
    pub interface: CommandId,
    pub router: CommandId,
}

/// A line that resolved to a command, with its negation flag.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub matched: Matched,
    pub negated: bool,
}

pub struct Shell {
    node: NodeId,
    device_type: DeviceType,
    modes: Vec<Mode>,
    tree: CommandTree,
    roots: ModeRoots,
    /// Echo run still waiting on the network (wall-clock simulations only).
    ping: Option<commands::PingRun>,
}

impl Shell {
    pub fn new(sim: &Simulation, node: NodeId) -> Result<Self, ShellError> {
        let device_type = sim.node(node)?.device_type();
        let (tree, roots) = commands::build_tree(device_type);
        Ok(Shell {
            node,
            device_type,
            modes: vec![Mode::User],
            tree,
            roots,
            ping: None,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn mode(&self) -> Mode {
        self.modes.last().copied().unwrap_or(Mode::User)
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    /// `R1>`, `R1#`, `R1(config-if)#` and so on.
    pub fn prompt(&self, sim: &Simulation) -> String {
        let name = sim.node(self.node).map(|n| n.name().to_string()).unwrap_or_default();
        format!("{}{}", name, self.mode().prompt_suffix())
    }

    fn root(&self, mode: Mode) -> CommandId {
        match mode {
            Mode::User => self.roots.user,
            Mode::Privileged => self.roots.privileged,
            Mode::GlobalConfig => self.roots.global,
            Mode::InterfaceConfig(_) => self.roots.interface,
            Mode::RouterConfig(_) => self.roots.router,
        }
    }

    /// Resolve `words` in `mode` without side effects.
    fn resolve(&self, mode: Mode, words: &[&str]) -> Result<Invocation, ShellError> {
        let root = self.root(mode);
        let negated = mode.is_config() && words[0].eq_ignore_ascii_case("no");
        if !negated {
            let matched = self.tree.resolve(root, words)?;
            return Ok(Invocation { matched, negated });
        }
        let rest = &words[1..];
        if rest.is_empty() {
            return Err(ShellError::Incomplete);
        }
        let matched = self.tree.resolve(root, rest)?;
        if !self.tree.is_negatable(root, rest) {
            return Err(ShellError::InvalidInput(rest[0].to_string()));
        }
        Ok(Invocation { matched, negated })
    }

    /// Run one line. Returns the lines the command printed.
    pub fn exec(&mut self, sim: &mut Simulation, line: &str) -> Result<Vec<String>, ShellError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() || words[0].starts_with('!') {
            return Ok(Vec::new());
        }
        if self.is_busy() {
            return Err(ShellError::Rejected("ping in progress".to_string()));
        }
        let mode = self.mode();
        let invocation = match self.resolve(mode, &words) {
            Ok(invocation) => invocation,
            Err(err) if mode.is_sub_config() => {
                let Ok(invocation) = self.resolve(Mode::GlobalConfig, &words) else {
                    return Err(err);
                };
                let saved = self.modes.clone();
                self.modes.pop();
                return self.run(sim, invocation).map_err(|err| {
                    self.modes = saved;
                    err
                });
            }
            Err(err) => return Err(err),
        };
        self.run(sim, invocation)
    }

    fn run(&mut self, sim: &mut Simulation, invocation: Invocation) -> Result<Vec<String>, ShellError> {
        debug!(
            node = self.node.0,
            cmd = ?invocation.matched.cmd,
            negated = invocation.negated,
            "shell command"
        );
        commands::execute(self, sim, &invocation)
    }

    /// True while a `ping` started on a wall-clock simulation is unfinished.
    pub fn is_busy(&self) -> bool {
        self.ping.is_some()
    }

    /// Advance a running `ping` without moving the clock. Returns the lines
    /// that finish it, or nothing while echoes are still outstanding.
    pub fn poll_background(&mut self, sim: &mut Simulation) -> Vec<String> {
        let Some(run) = self.ping.as_mut() else {
            return Vec::new();
        };
        match run.step(sim, self.node) {
            Ok(false) => Vec::new(),
            Ok(true) => {
                let output = run.summary();
                self.ping = None;
                output
            }
            Err(err) => {
                self.ping = None;
                vec![err.to_string()]
            }
        }
    }

    /// Run several lines, stopping at the first failure. The error carries
    /// the 1-based number of the failing line.
    pub fn exec_script<'a, I>(&mut self, sim: &mut Simulation, lines: I) -> Result<Vec<String>, (usize, ShellError)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut output = Vec::new();
        for (index, line) in lines.into_iter().enumerate() {
            output.extend(self.exec(sim, line).map_err(|err| (index + 1, err))?);
        }
        Ok(output)
    }

    /// Candidate completions for the last word of `partial`.
    pub fn autocomplete(&self, partial: &str) -> Vec<String> {
        let words: Vec<&str> = partial.split_whitespace().collect();
        let trailing = partial.is_empty() || partial.ends_with(char::is_whitespace);
        let mode = self.mode();
        let root = self.root(mode);
        let negated = mode.is_config() && words.first().map_or(false, |w| w.eq_ignore_ascii_case("no"));
        if negated && (words.len() > 1 || trailing) {
            return self.tree.complete(root, &words[1..], trailing);
        }
        let mut out = self.tree.complete(root, &words, trailing);
        let typed = match (words.as_slice(), trailing) {
            ([], _) => Some(""),
            ([word], false) => Some(*word),
            _ => None,
        };
        if let Some(typed) = typed.filter(|_| mode.is_config()) {
            if "no".starts_with(&typed.to_ascii_lowercase()) {
                out.push("no".to_string());
                out.sort();
            }
        }
        out
    }

    /// `?` help: what may follow `partial`, with descriptions.
    pub fn help(&self, partial: &str) -> Vec<(String, &'static str)> {
        let words: Vec<&str> = partial.split_whitespace().collect();
        let root = self.root(self.mode());
        self.tree.walk(root, &words).map_or_else(Vec::new, |node| self.tree.help(node))
    }

    pub(crate) fn push_mode(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    /// `exit`: leave the current mode; a no-op in user EXEC.
    pub(crate) fn exit_mode(&mut self) {
        if self.modes.len() > 1 {
            self.modes.pop();
        }
    }

    /// Drop back to the first `depth` modes of the stack.
    pub(crate) fn truncate_modes(&mut self, depth: usize) {
        self.modes.truncate(depth.max(1));
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("node", &self.node)
            .field("device_type", &self.device_type)
            .field("modes", &self.modes)
            .field("commands", &self.tree.len())
            .finish()
    }
}
