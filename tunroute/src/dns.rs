//! System DNS resolver takeover.
//!
//! The resolver file is moved aside to a backup path and replaced with one
//! listing the tunnel's nameservers. Restoring moves the backup back.

use crate::command::{CommandRunner, Invocation};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{Instrument, Span, info, warn};

/// Resolver configuration errors.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("failed to back up {}: {source}", .path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to restore {}: {source}", .path.display())]
    Restore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What was at the resolver path before takeover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Original {
    /// Moved to the backup path.
    BackedUp,
    /// Nothing was there; restoring removes our file.
    Absent,
}

/// Installs and restores the system resolver configuration.
pub struct ResolverManager {
    resolv_conf: PathBuf,
    backup: PathBuf,
    service: String,
    runner: Arc<dyn CommandRunner>,
    original: Option<Original>,
    span: Span,
}

impl ResolverManager {
    pub fn new(
        resolv_conf: PathBuf,
        backup: PathBuf,
        service: String,
        runner: Arc<dyn CommandRunner>,
        span: Span,
    ) -> Self {
        Self {
            resolv_conf,
            backup,
            service,
            runner,
            original: None,
            span,
        }
    }

    /// Whether a managed resolver configuration is currently installed.
    pub fn is_installed(&self) -> bool {
        self.original.is_some()
    }

    /// Replace the resolver configuration with `servers` and `domains`.
    ///
    /// Calling this again while installed rewrites the file but keeps the
    /// first backup.
    pub fn install(
        &mut self,
        servers: &[IpAddr],
        domains: &[String],
    ) -> Result<(), ResolverError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let first_install = self.original.is_none();
        if first_install {
            let original = match fs::rename(&self.resolv_conf, &self.backup) {
                Ok(()) => Original::BackedUp,
                Err(e) if e.kind() == io::ErrorKind::NotFound => Original::Absent,
                Err(source) => {
                    return Err(ResolverError::Backup {
                        path: self.resolv_conf.clone(),
                        source,
                    });
                }
            };
            self.original = Some(original);
        }

        let contents = render_resolv_conf(servers, domains);
        if let Err(source) = write_atomic(&self.resolv_conf, &contents) {
            if first_install {
                // Put the original back so the host keeps working DNS
                self.rollback();
            }
            return Err(ResolverError::Write {
                path: self.resolv_conf.clone(),
                source,
            });
        }

        info!(
            path = %self.resolv_conf.display(),
            servers = servers.len(),
            domains = domains.len(),
            "Installed resolver configuration"
        );
        Ok(())
    }

    fn rollback(&mut self) {
        if self.original == Some(Original::BackedUp)
            && let Err(e) = fs::rename(&self.backup, &self.resolv_conf)
        {
            warn!(error = %e, "Failed to roll back resolver configuration");
        }
        self.original = None;
    }

    /// Put back the configuration that existed before `install`.
    ///
    /// A no-op when nothing is installed. The installed flag is cleared
    /// even if restoring fails.
    pub fn restore(&mut self) -> Result<(), ResolverError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let Some(original) = self.original.take() else {
            return Ok(());
        };

        let result = match original {
            Original::BackedUp => fs::rename(&self.backup, &self.resolv_conf),
            Original::Absent => match fs::remove_file(&self.resolv_conf) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        match result {
            Ok(()) => {
                info!(path = %self.resolv_conf.display(), "Restored resolver configuration");
                Ok(())
            }
            Err(source) => {
                warn!(
                    path = %self.resolv_conf.display(),
                    error = %source,
                    "Failed to restore resolver configuration"
                );
                Err(ResolverError::Restore {
                    path: self.resolv_conf.clone(),
                    source,
                })
            }
        }
    }

    /// Ask the resolver service to reload. Failures are only logged.
    pub async fn restart_service(&self) {
        let invocation = Invocation::new("service", [self.service.as_str(), "restart"]);
        async {
            match self.runner.run(&invocation).await {
                Ok(out) if !out.combined.trim().is_empty() => {
                    info!(
                        command = %invocation,
                        output = %out.combined.trim(),
                        "Resolver service restarted"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(command = %invocation, error = %e, "Resolver service restart failed");
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Render resolv.conf(5) contents.
pub fn render_resolv_conf(servers: &[IpAddr], domains: &[String]) -> String {
    let mut out = String::from("# resolv.conf(5) file generated by tunroute\n");
    for server in servers {
        let _ = writeln!(out, "nameserver {server}");
    }
    if !domains.is_empty() {
        let _ = writeln!(out, "search {}", domains.join(" "));
    }
    out
}

/// Write `contents` to `path` via a temp file in the same directory.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644))?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
