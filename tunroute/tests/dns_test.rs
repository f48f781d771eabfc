//! Resolver takeover tests against a temporary resolv.conf.

mod common;

use common::{active_router, settings, test_config};
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::Span;
use tunroute::test_util::FakeRunner;
use tunroute::{Lifecycle, ResolverError, ResolverManager, Router, RouterConfig, RouterError};

const ORIGINAL: &str = "nameserver 192.168.1.1\nsearch lan\n";

struct ResolvFixture {
    _dir: TempDir,
    conf: PathBuf,
    backup: PathBuf,
}

impl ResolvFixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("resolv.conf");
        let backup = dir.path().join("resolv.pre-tunroute-backup.conf");
        fs::write(&conf, ORIGINAL).unwrap();
        Self {
            _dir: dir,
            conf,
            backup,
        }
    }

    fn manager(&self, runner: Arc<FakeRunner>) -> ResolverManager {
        ResolverManager::new(
            self.conf.clone(),
            self.backup.clone(),
            "systemd-resolved".to_string(),
            runner,
            Span::none(),
        )
    }

    fn config(&self) -> RouterConfig {
        RouterConfig {
            manage_dns: true,
            resolv_conf: self.conf.clone(),
            resolv_conf_backup: self.backup.clone(),
            ..test_config()
        }
    }

    fn contents(&self) -> String {
        fs::read_to_string(&self.conf).unwrap()
    }
}

fn servers() -> Vec<IpAddr> {
    vec!["100.100.100.100".parse().unwrap()]
}

#[test]
fn test_install_and_restore() {
    let fx = ResolvFixture::new();
    let mut manager = fx.manager(Arc::new(FakeRunner::new()));

    manager
        .install(&servers(), &["corp.example".to_string()])
        .unwrap();
    assert!(manager.is_installed());
    let installed = fx.contents();
    assert!(installed.contains("nameserver 100.100.100.100\n"));
    assert!(installed.contains("search corp.example\n"));
    assert_eq!(fs::read_to_string(&fx.backup).unwrap(), ORIGINAL);

    manager.restore().unwrap();
    assert!(!manager.is_installed());
    assert_eq!(fx.contents(), ORIGINAL);
    assert!(!fx.backup.exists());
}

#[test]
fn test_restore_without_install_is_noop() {
    let fx = ResolvFixture::new();
    let mut manager = fx.manager(Arc::new(FakeRunner::new()));

    manager.restore().unwrap();
    manager.restore().unwrap();
    assert_eq!(fx.contents(), ORIGINAL);
}

#[test]
fn test_reinstall_keeps_first_backup() {
    let fx = ResolvFixture::new();
    let mut manager = fx.manager(Arc::new(FakeRunner::new()));

    manager.install(&servers(), &[]).unwrap();
    manager
        .install(&["1.1.1.1".parse().unwrap()], &[])
        .unwrap();
    assert!(fx.contents().contains("nameserver 1.1.1.1\n"));
    assert_eq!(fs::read_to_string(&fx.backup).unwrap(), ORIGINAL);

    manager.restore().unwrap();
    assert_eq!(fx.contents(), ORIGINAL);
}

/// Without an original file, restoring removes ours.
#[test]
fn test_install_without_original() {
    let fx = ResolvFixture::new();
    fs::remove_file(&fx.conf).unwrap();
    let mut manager = fx.manager(Arc::new(FakeRunner::new()));

    manager.install(&servers(), &[]).unwrap();
    assert!(fx.conf.exists());
    assert!(!fx.backup.exists());

    manager.restore().unwrap();
    assert!(!fx.conf.exists());
}

#[test]
fn test_install_into_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ResolverManager::new(
        dir.path().join("missing/resolv.conf"),
        dir.path().join("missing/backup.conf"),
        "systemd-resolved".to_string(),
        Arc::new(FakeRunner::new()),
        Span::none(),
    );

    let err = manager.install(&servers(), &[]).unwrap_err();
    assert!(matches!(err, ResolverError::Write { .. }));
    assert!(!manager.is_installed());
}

#[tokio::test]
async fn test_restart_failure_is_swallowed() {
    let fx = ResolvFixture::new();
    let runner = Arc::new(FakeRunner::new());
    runner.fail_on("service");
    let manager = fx.manager(runner.clone());

    manager.restart_service().await;

    assert_eq!(runner.commands(), vec!["service systemd-resolved restart"]);
}

#[tokio::test]
async fn test_router_manages_dns_when_enabled() {
    let fx = ResolvFixture::new();
    let (mut router, runner) = active_router(fx.config()).await;

    let mut desired = settings("100.64.0.1/32", &["10.0.0.0/24"]);
    desired.dns = servers();
    desired.dns_domains = vec!["corp.example".to_string()];
    router.set_routes(&desired).await.unwrap();

    assert!(router.resolver().is_installed());
    assert!(fx.contents().contains("nameserver 100.100.100.100"));
    assert_eq!(
        runner.commands().last().unwrap(),
        "service systemd-resolved restart"
    );

    runner.clear();
    router.close().await.unwrap();

    assert_eq!(fx.contents(), ORIGINAL);
    assert_eq!(
        runner.commands().first().unwrap(),
        "service systemd-resolved restart"
    );
}

#[tokio::test]
async fn test_router_restores_when_dns_cleared() {
    let fx = ResolvFixture::new();
    let (mut router, runner) = active_router(fx.config()).await;

    let mut desired = settings("100.64.0.1/32", &[]);
    desired.dns = servers();
    router.set_routes(&desired).await.unwrap();
    runner.clear();

    desired.dns.clear();
    router.set_routes(&desired).await.unwrap();

    assert!(!router.resolver().is_installed());
    assert_eq!(fx.contents(), ORIGINAL);
    assert_eq!(runner.commands(), vec!["service systemd-resolved restart"]);
}

/// With DNS management off the resolver file is never touched.
#[tokio::test]
async fn test_router_ignores_dns_when_disabled() {
    let fx = ResolvFixture::new();
    let config = RouterConfig {
        manage_dns: false,
        ..fx.config()
    };
    let (mut router, runner) = active_router(config).await;

    let mut desired = settings("100.64.0.1/32", &[]);
    desired.dns = servers();
    router.set_routes(&desired).await.unwrap();
    router.close().await.unwrap();

    assert_eq!(fx.contents(), ORIGINAL);
    assert!(runner.commands_matching("service").is_empty());
}

/// A failed restore is returned from close, which still completes.
#[tokio::test]
async fn test_close_reports_restore_failure() {
    let fx = ResolvFixture::new();
    let (mut router, _runner) = active_router(fx.config()).await;

    let mut desired = settings("100.64.0.1/32", &[]);
    desired.dns = servers();
    router.set_routes(&desired).await.unwrap();
    fs::remove_file(&fx.backup).unwrap();

    let err = router.close().await.unwrap_err();

    assert!(matches!(
        err,
        RouterError::Resolver(ResolverError::Restore { .. })
    ));
    assert!(!router.resolver().is_installed());
    assert_eq!(router.lifecycle(), Lifecycle::Closed);
}
