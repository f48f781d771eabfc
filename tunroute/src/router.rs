//! Router facade driven by the VPN engine.
//!
//! The engine creates one router per tunnel interface, calls `up` once,
//! `set_routes` whenever the peer topology changes and `close` at shutdown.
//! Calls must be serialized by the caller.

use crate::command::{CommandRunner, SystemRunner};
use crate::config::RouterConfig;
use crate::dns::ResolverManager;
use crate::error::{FirstError, Result, RouterError};
use crate::reconciler::Reconciler;
use crate::state::{Lifecycle, RouteSettings};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tracing::info_span;

/// Source of the OS interface name for a tunnel.
pub trait TunnelDevice {
    fn name(&self) -> io::Result<String>;
}

/// Capabilities the VPN engine needs from the host network layer.
#[async_trait]
pub trait Router: Send {
    async fn up(&mut self) -> Result<()>;
    async fn set_routes(&mut self, settings: &RouteSettings) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Linux implementation using ip(8), iptables(8) and resolv.conf.
pub struct LinuxRouter {
    reconciler: Reconciler,
    resolver: ResolverManager,
    manage_dns: bool,
}

impl LinuxRouter {
    /// Create a router that runs commands on the host.
    pub fn new(device: &dyn TunnelDevice, config: RouterConfig) -> Result<Self> {
        let runner = Arc::new(SystemRunner::new(config.command_timeout()));
        Self::with_runner(device, runner, config)
    }

    /// Create a router that issues commands through `runner`.
    pub fn with_runner(
        device: &dyn TunnelDevice,
        runner: Arc<dyn CommandRunner>,
        config: RouterConfig,
    ) -> Result<Self> {
        let iface = device.name().map_err(RouterError::Device)?;
        let span = info_span!("tunroute", iface = %iface);

        let resolver = ResolverManager::new(
            config.resolv_conf.clone(),
            config.resolv_conf_backup.clone(),
            config.resolver_service.clone(),
            Arc::clone(&runner),
            span.clone(),
        );
        let reconciler = Reconciler::new(iface, runner, &config, span);

        Ok(Self {
            reconciler,
            resolver,
            manage_dns: config.manage_dns,
        })
    }

    pub fn iface(&self) -> &str {
        self.reconciler.iface()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.reconciler.lifecycle()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn resolver(&self) -> &ResolverManager {
        &self.resolver
    }

    async fn apply_dns(&mut self, settings: &RouteSettings) -> Result<()> {
        let result = if settings.dns.is_empty() {
            if !self.resolver.is_installed() {
                return Ok(());
            }
            self.resolver.restore()
        } else {
            self.resolver.install(&settings.dns, &settings.dns_domains)
        };
        self.resolver.restart_service().await;
        result.map_err(RouterError::from)
    }
}

#[async_trait]
impl Router for LinuxRouter {
    async fn up(&mut self) -> Result<()> {
        self.reconciler.up().await
    }

    async fn set_routes(&mut self, settings: &RouteSettings) -> Result<()> {
        let mut errq = FirstError::default();
        if let Err(e) = self.reconciler.set_routes(settings).await {
            if matches!(e, RouterError::InvalidTransition { .. }) {
                return Err(e);
            }
            errq.record(e);
        }

        if self.manage_dns
            && let Err(e) = self.apply_dns(settings).await
        {
            errq.record(e);
        }

        errq.into_result()
    }

    async fn close(&mut self) -> Result<()> {
        self.reconciler.check_lifecycle("close", Lifecycle::Active)?;

        let mut errq = FirstError::default();
        if let Err(e) = self.resolver.restore() {
            errq.record(e);
        }
        if self.manage_dns {
            self.resolver.restart_service().await;
        }
        if let Err(e) = self.reconciler.close().await {
            errq.record(e);
        }

        errq.into_result()
    }
}

impl std::fmt::Debug for LinuxRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxRouter")
            .field("iface", &self.iface())
            .field("lifecycle", &self.lifecycle())
            .field("manage_dns", &self.manage_dns)
            .finish()
    }
}
