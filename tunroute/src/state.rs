//! Desired and applied network state.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// A peer as seen by the host: the destinations it may receive traffic for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
}

impl Peer {
    pub fn new(allowed_ips: Vec<IpNet>) -> Self {
        Self {
            public_key: String::new(),
            allowed_ips,
        }
    }
}

/// Desired state computed by the control plane for one tunnel interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSettings {
    /// Local address to assign to the tunnel interface.
    pub local_addr: IpNet,
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// DNS servers to install when DNS management is enabled.
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    /// DNS search domains.
    #[serde(default)]
    pub dns_domains: Vec<String>,
}

impl RouteSettings {
    pub fn new(local_addr: IpNet, peers: Vec<Peer>) -> Self {
        Self {
            local_addr,
            peers,
            dns: Vec::new(),
            dns_domains: Vec::new(),
        }
    }

    /// Union of all peers' allowed IPs, keyed by network address.
    pub fn route_set(&self) -> BTreeSet<IpNet> {
        self.peers
            .iter()
            .flat_map(|peer| peer.allowed_ips.iter().map(IpNet::trunc))
            .collect()
    }
}

/// What the reconciler last attempted to apply.
///
/// Updated after every `set_routes` regardless of individual command
/// failures; it is the baseline for the next diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedState {
    pub local_addr: Option<IpNet>,
    pub routes: BTreeSet<IpNet>,
}

/// Result of diffing two route sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDiff {
    pub to_remove: Vec<IpNet>,
    pub to_add: Vec<IpNet>,
}

impl RouteDiff {
    pub fn between(applied: &BTreeSet<IpNet>, desired: &BTreeSet<IpNet>) -> Self {
        Self {
            to_remove: applied.difference(desired).copied().collect(),
            to_add: desired.difference(applied).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Router lifecycle: `Uninitialized -> Active -> Closed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Active,
    Closed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Active => "active",
            Lifecycle::Closed => "closed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
