//! tunroute: host network state for a mesh-VPN tunnel interface.
//!
//! Keeps the interface address, the routes to peers' allowed IPs, the
//! forwarding/NAT rules and optionally the system resolver in sync with the
//! desired state computed by the VPN control plane.
//!
//! # Architecture
//!
//! ```text
//! VPN engine --> Router (up / set_routes / close)
//!                  |
//!                  +--> Reconciler --> CommandRunner --> ip, iptables
//!                  |
//!                  +--> ResolverManager --> /etc/resolv.conf, service restart
//! ```
//!
//! Changes are applied best-effort: every command is attempted, the first
//! failure is returned and the rest are logged.

pub mod command;
pub mod config;
pub mod dns;
pub mod error;
pub mod firewall;
pub mod iproute;
pub mod ledger;
pub mod reconciler;
pub mod router;
pub mod state;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export commonly used types
pub use command::{CommandError, CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use config::{ConfigError, ForwardingPolicy, RouterConfig};
pub use dns::{ResolverError, ResolverManager};
pub use error::{Result, RouterError};
pub use ledger::Resource;
pub use reconciler::Reconciler;
pub use router::{LinuxRouter, Router, TunnelDevice};
pub use state::{AppliedState, Lifecycle, Peer, RouteSettings};
