//! Reconciler - diffs desired against applied state and issues ip/iptables
//! commands to converge the host.
//!
//! Every command is attempted even when an earlier one failed. Only the
//! first failure of a call is returned; all of them are logged.

use crate::command::{CommandError, CommandOutput, CommandRunner, Invocation};
use crate::config::{ForwardingPolicy, RouterConfig};
use crate::error::{FirstError, Result, RouterError};
use crate::ledger::{Ledger, Resource};
use crate::state::{AppliedState, Lifecycle, RouteDiff, RouteSettings};
use crate::{firewall, iproute};
use std::sync::Arc;
use tracing::{Instrument, Span, debug, error, info, warn};

/// Owns the applied network state of one tunnel interface.
pub struct Reconciler {
    iface: String,
    runner: Arc<dyn CommandRunner>,
    outbound_interface: Option<String>,
    forwarding_policy: ForwardingPolicy,
    teardown_on_close: bool,
    lifecycle: Lifecycle,
    applied: AppliedState,
    ledger: Ledger,
    span: Span,
}

impl Reconciler {
    pub fn new(
        iface: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        config: &RouterConfig,
        span: Span,
    ) -> Self {
        Self {
            iface: iface.into(),
            runner,
            outbound_interface: config.outbound_interface.clone(),
            forwarding_policy: config.forwarding_policy,
            teardown_on_close: config.teardown_on_close,
            lifecycle: Lifecycle::Uninitialized,
            applied: AppliedState::default(),
            ledger: Ledger::new(),
            span,
        }
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// State the last `set_routes` attempted to reach.
    pub fn applied(&self) -> &AppliedState {
        &self.applied
    }

    /// Resources the OS confirmed as installed, in install order.
    pub fn installed(&self) -> &[Resource] {
        self.ledger.entries()
    }

    /// Fail with `InvalidTransition` unless the router is in `expected`.
    pub fn check_lifecycle(&self, operation: &'static str, expected: Lifecycle) -> Result<()> {
        if self.lifecycle != expected {
            return Err(RouterError::InvalidTransition {
                operation,
                state: self.lifecycle,
            });
        }
        Ok(())
    }

    /// Bring the interface up and install forwarding rules.
    ///
    /// Failing to set the link up is returned as `InterfaceUp`. Forwarding
    /// and NAT failures follow the configured [`ForwardingPolicy`].
    pub async fn up(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.up_inner().instrument(span).await
    }

    async fn up_inner(&mut self) -> Result<()> {
        self.check_lifecycle("bring up", Lifecycle::Uninitialized)?;

        let link = iproute::link_up(&self.iface);
        if let Err(source) = self.runner.run(&link).await {
            error!(command = %link, error = %source, "Failed to bring up tunnel interface");
            return Err(RouterError::InterfaceUp {
                iface: self.iface.clone(),
                source,
            });
        }
        info!("Tunnel interface is up");

        if let Err(e) = self.install_forwarding().await {
            self.remove_forwarding().await;
            return Err(e);
        }

        self.lifecycle = Lifecycle::Active;
        Ok(())
    }

    async fn install_forwarding(&mut self) -> Result<()> {
        let forward = firewall::forward_accept(&self.iface);
        match self.exec(&forward, "iptables forward").await {
            Ok(_) => self.ledger.record(Resource::ForwardRule),
            Err(e) => self.forwarding_failed(RouterError::Forwarding(e))?,
        }

        match self.resolve_outbound_interface().await {
            Some(outbound) => {
                let nat = firewall::masquerade(&outbound);
                match self.exec(&nat, "iptables nat").await {
                    Ok(_) => {
                        info!(outbound = %outbound, "Masquerading forwarded traffic");
                        self.ledger.record(Resource::Masquerade { outbound });
                    }
                    Err(e) => self.forwarding_failed(RouterError::Forwarding(e))?,
                }
            }
            None => self.forwarding_failed(RouterError::NoOutboundInterface)?,
        }
        Ok(())
    }

    /// Undo the rules a failed `up` installed, so a retry starts clean.
    async fn remove_forwarding(&mut self) {
        for resource in self.ledger.drain_for_teardown() {
            let invocation = resource.teardown(&self.iface);
            let _ = self.exec(&invocation, "forwarding rollback").await;
        }
    }

    fn forwarding_failed(&self, err: RouterError) -> Result<()> {
        match self.forwarding_policy {
            ForwardingPolicy::BestEffort => {
                warn!(error = %err, "Continuing without forwarding");
                Ok(())
            }
            ForwardingPolicy::Required => Err(err),
        }
    }

    async fn resolve_outbound_interface(&self) -> Option<String> {
        if let Some(name) = &self.outbound_interface {
            return Some(name.clone());
        }

        let query = iproute::default_route_query();
        match self.exec(&query, "default route lookup").await {
            Ok(out) => {
                let dev = iproute::parse_default_dev(&out.combined).map(str::to_string);
                if dev.is_none() {
                    warn!("No default route, cannot determine outbound interface");
                }
                dev
            }
            Err(_) => None,
        }
    }

    /// Converge address and routes to `settings`.
    ///
    /// The applied state is replaced by `settings` even when commands fail,
    /// so a failed delta is not retried by an identical follow-up call.
    pub async fn set_routes(&mut self, settings: &RouteSettings) -> Result<()> {
        let span = self.span.clone();
        self.set_routes_inner(settings).instrument(span).await
    }

    async fn set_routes_inner(&mut self, settings: &RouteSettings) -> Result<()> {
        self.check_lifecycle("set routes", Lifecycle::Active)?;

        let mut errq = FirstError::default();
        let old_local = self.applied.local_addr;
        let new_local = settings.local_addr;

        // Address first: new routes use it as their gateway.
        if old_local != Some(new_local) {
            if let Some(old) = old_local {
                let del = iproute::addr_del(&old, &self.iface);
                match self.exec(&del, "addr del").await {
                    Ok(_) => self.ledger.release_address(&old),
                    Err(e) => errq.record(e),
                }
            }
            let add = iproute::addr_add(&new_local, &self.iface);
            match self.exec(&add, "addr add").await {
                Ok(_) => {
                    info!(addr = %new_local, "Local address changed");
                    self.ledger.record(Resource::Address(new_local));
                }
                Err(e) => errq.record(e),
            }
        }

        let new_routes = settings.route_set();
        let diff = RouteDiff::between(&self.applied.routes, &new_routes);
        let old_gateway = old_local.map(|addr| addr.addr());
        let new_gateway = Some(new_local.addr());

        for route in &diff.to_remove {
            let del = iproute::route_del(route, old_gateway, &self.iface);
            match self.exec(&del, "route del").await {
                Ok(_) => self.ledger.release_route(route),
                Err(e) => errq.record(e),
            }
        }

        for route in &diff.to_add {
            let add = iproute::route_add(route, new_gateway, &self.iface);
            match self.exec(&add, "route add").await {
                Ok(_) => self.ledger.record(Resource::Route {
                    destination: *route,
                    gateway: new_gateway,
                }),
                Err(e) => errq.record(e),
            }
        }

        if !diff.is_empty() {
            info!(
                removed = diff.to_remove.len(),
                added = diff.to_add.len(),
                total = new_routes.len(),
                "Routes reconciled"
            );
        }

        self.applied = AppliedState {
            local_addr: Some(new_local),
            routes: new_routes,
        };

        errq.into_result()
    }

    /// Mark the router closed and, if configured, remove everything the
    /// ledger tracks in reverse install order.
    pub async fn close(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.close_inner().instrument(span).await
    }

    async fn close_inner(&mut self) -> Result<()> {
        self.check_lifecycle("close", Lifecycle::Active)?;
        self.lifecycle = Lifecycle::Closed;

        if !self.teardown_on_close {
            if !self.ledger.is_empty() {
                info!(
                    resources = self.ledger.entries().len(),
                    "Leaving installed rules and routes in place"
                );
            }
            return Ok(());
        }

        let mut errq = FirstError::default();
        for resource in self.ledger.drain_for_teardown() {
            let invocation = resource.teardown(&self.iface);
            if let Err(e) = self.exec(&invocation, "teardown").await {
                errq.record(e);
            }
        }
        self.applied = AppliedState::default();
        info!("Tunnel state torn down");

        errq.into_result()
    }

    async fn exec(
        &self,
        invocation: &Invocation,
        what: &str,
    ) -> std::result::Result<CommandOutput, CommandError> {
        debug!(command = %invocation, "Issuing {}", what);
        let result = self.runner.run(invocation).await;
        if let Err(e) = &result {
            warn!(command = %invocation, error = %e, "{} failed", what);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeRunner;

    fn reconciler(runner: &Arc<FakeRunner>, config: RouterConfig) -> Reconciler {
        Reconciler::new("tun0", runner.clone(), &config, Span::none())
    }

    fn config() -> RouterConfig {
        RouterConfig {
            outbound_interface: Some("eth0".to_string()),
            ..RouterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_up_installs_rules_in_order() {
        let runner = Arc::new(FakeRunner::new());
        let mut r = reconciler(&runner, config());
        r.up().await.unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "ip link set tun0 up",
                "iptables -A FORWARD -i tun0 -j ACCEPT",
                "iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE",
            ]
        );
        assert_eq!(r.lifecycle(), Lifecycle::Active);
        assert_eq!(r.installed().len(), 2);
    }

    #[tokio::test]
    async fn test_up_twice_is_rejected() {
        let runner = Arc::new(FakeRunner::new());
        let mut r = reconciler(&runner, config());
        r.up().await.unwrap();
        let err = r.up().await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::InvalidTransition {
                operation: "bring up",
                state: Lifecycle::Active
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_address_add_not_in_ledger() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_on("ip addr add");
        let mut r = reconciler(&runner, config());
        r.up().await.unwrap();

        let settings = RouteSettings::new("100.64.0.1/32".parse().unwrap(), vec![]);
        assert!(r.set_routes(&settings).await.is_err());
        assert!(
            !r.installed()
                .iter()
                .any(|res| matches!(res, Resource::Address(_)))
        );
    }

    #[tokio::test]
    async fn test_failed_route_add_not_in_ledger() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_on("ip route add 10.0.1.0/24");
        let mut r = reconciler(&runner, config());
        r.up().await.unwrap();

        let settings = RouteSettings::new(
            "100.64.0.1/32".parse().unwrap(),
            vec![crate::state::Peer::new(vec![
                "10.0.0.0/24".parse().unwrap(),
                "10.0.1.0/24".parse().unwrap(),
            ])],
        );
        assert!(r.set_routes(&settings).await.is_err());

        // Applied state holds both, the ledger only what succeeded
        assert_eq!(r.applied().routes.len(), 2);
        let routes: Vec<_> = r
            .installed()
            .iter()
            .filter_map(|res| match res {
                Resource::Route { destination, .. } => Some(destination.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(routes, vec!["10.0.0.0/24"]);
    }
}
