//! IPv4 route selection: connected subnets, static routes, default gateway.

use crate::device::{InterfaceId, InterfaceTable};
use crate::message::Ipv4Interface;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRoute {
    /// Destination prefix; the host bits are ignored.
    pub prefix: Ipv4Interface,
    pub next_hop: Ipv4Addr,
}

impl StaticRoute {
    pub fn matches(&self, dst: Ipv4Addr) -> bool {
        self.prefix.contains(dst)
    }
}

/// Where a packet leaves and which neighbour it is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub iface: InterfaceId,
    pub next_hop: Ipv4Addr,
    /// Address of the egress interface, used as the source of new packets.
    pub source: Ipv4Addr,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    default_gateway: Option<Ipv4Addr>,
    routes: Vec<StaticRoute>,
}

impl RoutingTable {
    pub fn default_gateway(&self) -> Option<Ipv4Addr> {
        self.default_gateway
    }

    pub fn set_default_gateway(&mut self, gateway: Option<Ipv4Addr>) {
        self.default_gateway = gateway;
    }

    pub fn routes(&self) -> &[StaticRoute] {
        &self.routes
    }

    /// Add a route, replacing one for the same prefix.
    pub fn add_route(&mut self, route: StaticRoute) {
        let network = route.prefix.network();
        let prefix_len = route.prefix.prefix_len;
        self.routes
            .retain(|r| !(r.prefix.network() == network && r.prefix.prefix_len == prefix_len));
        self.routes.push(route);
    }

    /// Remove the route for `prefix`; returns whether one existed.
    pub fn remove_route(&mut self, prefix: Ipv4Interface) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| {
            !(r.prefix.network() == prefix.network() && r.prefix.prefix_len == prefix.prefix_len)
        });
        self.routes.len() != before
    }

    /// Pick the egress for `dst`. Connected subnets win, then the longest
    /// matching static route, then the default gateway. Next hops must
    /// themselves be on a connected subnet.
    pub fn lookup(&self, interfaces: &InterfaceTable, dst: Ipv4Addr) -> Option<RouteDecision> {
        if let Some((iface, addr)) = interfaces.connected(dst) {
            return Some(RouteDecision {
                iface,
                next_hop: dst,
                source: addr.address,
            });
        }
        let via = self
            .routes
            .iter()
            .filter(|r| r.matches(dst))
            .max_by_key(|r| r.prefix.prefix_len)
            .map(|r| r.next_hop)
            .or(self.default_gateway)?;
        let (iface, addr) = interfaces.connected(via)?;
        Some(RouteDecision {
            iface,
            next_hop: via,
            source: addr.address,
        })
    }
}
