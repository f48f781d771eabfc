//! Tracking of OS resources confirmed as installed.
//!
//! The applied state records what was *attempted*; the ledger records only
//! what the OS accepted, so teardown issues a delete for exactly those.

use crate::command::Invocation;
use crate::{firewall, iproute};
use ipnet::IpNet;
use std::net::IpAddr;

/// A single installed OS resource and enough context to remove it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    ForwardRule,
    Masquerade { outbound: String },
    Address(IpNet),
    Route {
        destination: IpNet,
        gateway: Option<IpAddr>,
    },
}

impl Resource {
    /// Command that removes this resource from `iface`.
    pub fn teardown(&self, iface: &str) -> Invocation {
        match self {
            Resource::ForwardRule => firewall::forward_accept_delete(iface),
            Resource::Masquerade { outbound } => firewall::masquerade_delete(outbound),
            Resource::Address(addr) => iproute::addr_del(addr, iface),
            Resource::Route {
                destination,
                gateway,
            } => iproute::route_del(destination, *gateway, iface),
        }
    }
}

/// Installed resources in install order.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<Resource>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, resource: Resource) {
        self.entries.push(resource);
    }

    pub fn release_address(&mut self, addr: &IpNet) {
        self.release(|r| matches!(r, Resource::Address(a) if a == addr));
    }

    pub fn release_route(&mut self, destination: &IpNet) {
        self.release(|r| matches!(r, Resource::Route { destination: d, .. } if d == destination));
    }

    fn release(&mut self, matches: impl Fn(&Resource) -> bool) {
        if let Some(pos) = self.entries.iter().position(matches) {
            self.entries.remove(pos);
        }
    }

    pub fn entries(&self) -> &[Resource] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take all entries, most recently installed first.
    pub fn drain_for_teardown(&mut self) -> Vec<Resource> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.reverse();
        entries
    }
}
