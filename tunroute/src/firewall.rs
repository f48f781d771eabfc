//! iptables rules for forwarding tunnel traffic.

use crate::command::Invocation;

const FORWARD_CHAIN: &str = "FORWARD";
const NAT_CHAIN: &str = "POSTROUTING";

/// `iptables -A FORWARD -i <iface> -j ACCEPT`
pub fn forward_accept(iface: &str) -> Invocation {
    forward("-A", iface)
}

/// `iptables -D FORWARD -i <iface> -j ACCEPT`
pub fn forward_accept_delete(iface: &str) -> Invocation {
    forward("-D", iface)
}

/// `iptables -t nat -A POSTROUTING -o <outbound> -j MASQUERADE`
pub fn masquerade(outbound: &str) -> Invocation {
    nat("-A", outbound)
}

/// `iptables -t nat -D POSTROUTING -o <outbound> -j MASQUERADE`
pub fn masquerade_delete(outbound: &str) -> Invocation {
    nat("-D", outbound)
}

fn forward(op: &str, iface: &str) -> Invocation {
    Invocation::new("iptables", [op, FORWARD_CHAIN, "-i", iface, "-j", "ACCEPT"])
}

fn nat(op: &str, outbound: &str) -> Invocation {
    Invocation::new(
        "iptables",
        ["-t", "nat", op, NAT_CHAIN, "-o", outbound, "-j", "MASQUERADE"],
    )
}
