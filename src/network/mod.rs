//! Network-layer services that run on hosts and routers.

mod arp;
mod hsrp;
mod icmp;
mod ip;
mod ospf;

pub use arp::{ArpEntry, ArpService};
pub use hsrp::{HsrpGroupStatus, HsrpService, HSRP_GROUP_ADDRESS};
pub use icmp::{EchoOutcome, IcmpService};
pub use ip::{RouteDecision, RoutingTable, StaticRoute};
pub use ospf::{NeighborState, NeighborSummary, NetworkStatement, OspfService, OSPF_GROUP_ADDRESS};
