//! ip(8) invocations for link, address and route management.

use crate::command::Invocation;
use ipnet::IpNet;
use std::net::IpAddr;

/// `ip link set <iface> up`
pub fn link_up(iface: &str) -> Invocation {
    Invocation::new("ip", ["link", "set", iface, "up"])
}

/// `ip addr add <cidr> dev <iface>`
pub fn addr_add(addr: &IpNet, iface: &str) -> Invocation {
    Invocation::new("ip", ["addr", "add", &addr.to_string(), "dev", iface])
}

/// `ip addr del <cidr> dev <iface>`
pub fn addr_del(addr: &IpNet, iface: &str) -> Invocation {
    Invocation::new("ip", ["addr", "del", &addr.to_string(), "dev", iface])
}

/// `ip route add <network>/<prefix> via <gateway> dev <iface>`
pub fn route_add(destination: &IpNet, gateway: Option<IpAddr>, iface: &str) -> Invocation {
    route("add", destination, gateway, iface)
}

/// `ip route del <network>/<prefix> via <gateway> dev <iface>`
pub fn route_del(destination: &IpNet, gateway: Option<IpAddr>, iface: &str) -> Invocation {
    route("del", destination, gateway, iface)
}

fn route(verb: &str, destination: &IpNet, gateway: Option<IpAddr>, iface: &str) -> Invocation {
    // The kernel rejects prefixes with host bits set.
    let network = destination.trunc().to_string();
    let mut args = vec!["route".to_string(), verb.to_string(), network];
    if let Some(gateway) = gateway {
        args.push("via".to_string());
        args.push(gateway.to_string());
    }
    args.push("dev".to_string());
    args.push(iface.to_string());
    Invocation::new("ip", args)
}

/// `ip route show default`
pub fn default_route_query() -> Invocation {
    Invocation::new("ip", ["route", "show", "default"])
}

/// Extract the egress device from `ip route show default` output.
///
/// Example: "default via 192.168.1.1 dev eth0 proto dhcp metric 100"
pub fn parse_default_dev(output: &str) -> Option<&str> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("default"))
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "dev")?;
            tokens.next()
        })
}
