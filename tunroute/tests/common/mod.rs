//! Shared helpers for tunroute integration tests.

#![allow(dead_code)]

use ipnet::IpNet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tunroute::test_util::{FakeRunner, NamedDevice};
use tunroute::{LinuxRouter, Peer, RouteSettings, Router, RouterConfig};

/// Route test output through the test harness; set RUST_LOG to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

pub fn test_config() -> RouterConfig {
    RouterConfig {
        outbound_interface: Some("eth0".to_string()),
        ..RouterConfig::default()
    }
}

/// Desired state with one peer per CIDR.
pub fn settings(local: &str, routes: &[&str]) -> RouteSettings {
    RouteSettings::new(
        net(local),
        routes.iter().map(|r| Peer::new(vec![net(r)])).collect(),
    )
}

/// A router that has completed `up`, with the runner log cleared.
pub async fn active_router(config: RouterConfig) -> (LinuxRouter, Arc<FakeRunner>) {
    init_tracing();
    let runner = Arc::new(FakeRunner::new());
    let mut router =
        LinuxRouter::with_runner(&NamedDevice::default(), runner.clone(), config).unwrap();
    router.up().await.unwrap();
    runner.clear();
    (router, runner)
}
