//! Error types.
//!
//! Protocol timeouts (ARP, ICMP) are not errors: they resolve to an outcome.
//! These enums cover configuration mistakes and broken engine preconditions.

use crate::device::{InterfaceId, LinkId, NodeId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("unknown node '{0}'")]
    UnknownNodeName(String),
    #[error("node {node:?} has no interface {iface:?}")]
    UnknownInterface { node: NodeId, iface: InterfaceId },
    #[error("node {node:?} has no interface named '{name}'")]
    UnknownInterfaceName { node: NodeId, name: String },
    #[error("interface name '{0}' already in use")]
    DuplicateInterface(String),
    #[error("node name '{0}' already in use")]
    DuplicateNode(String),
    #[error("unknown link {0:?}")]
    UnknownLink(LinkId),
    #[error("interface {0} is already attached to a link")]
    AlreadyLinked(String),
    #[error("interface {0} is not attached to a link")]
    NotLinked(String),
    #[error("link {0:?} has no far-end interface")]
    DanglingLink(LinkId),
    #[error("interface {0} is administratively down")]
    InterfaceDown(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("{0} is not available on this device")]
    ServiceUnavailable(&'static str),
    #[error("no route to {0}")]
    NoRoute(std::net::Ipv4Addr),
    #[error("invalid link length {0}")]
    InvalidLength(String),
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Errors surfaced to the configuration shell. `Display` renders the
/// IOS-style message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    #[error("% Invalid input detected at '{0}'")]
    InvalidInput(String),
    #[error("% Incomplete command.")]
    Incomplete,
    #[error("% Ambiguous command: \"{0}\"")]
    Ambiguous(String),
    #[error("% {what} out of range ({min}-{max})")]
    OutOfRange { what: &'static str, min: u64, max: u64 },
    #[error("% Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },
    #[error("% {0}")]
    Rejected(String),
    #[error("% {0}")]
    Engine(#[from] SimError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Import failures. Import is all-or-nothing: any error means no topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode JSON topology: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to decode TOML topology: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("topology references unknown device '{0}'")]
    UnknownDevice(String),
    #[error("device '{device}' has no interface '{interface}'")]
    UnknownInterface { device: String, interface: String },
    #[error("device '{device}' config line {line} failed: {error}")]
    Config {
        device: String,
        line: usize,
        error: ShellError,
    },
    #[error(transparent)]
    Engine(#[from] SimError),
}
