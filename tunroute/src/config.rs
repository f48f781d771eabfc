//! Router configuration.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default resolver configuration file.
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Where the pre-takeover resolver file is kept.
pub const RESOLV_CONF_BACKUP: &str = "/etc/resolv.pre-tunroute-backup.conf";

/// Default resolver service reloaded after resolver changes.
pub const RESOLVER_SERVICE: &str = "systemd-resolved";

/// Default per-command timeout in seconds.
pub const COMMAND_TIMEOUT_SECS: u64 = 10;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How `up` treats forwarding and NAT rule failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardingPolicy {
    /// Log the failure and keep going; the tunnel works as a plain client.
    #[default]
    BestEffort,
    /// Fail `up`.
    Required,
}

/// Configuration for one tunnel router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Interface forwarded traffic is masqueraded on. Resolved from the
    /// default route when unset.
    pub outbound_interface: Option<String>,
    pub forwarding_policy: ForwardingPolicy,
    /// Take over the system resolver configuration on `set_routes`.
    /// Also gates the resolver service restart on `close`.
    pub manage_dns: bool,
    pub resolv_conf: PathBuf,
    pub resolv_conf_backup: PathBuf,
    pub resolver_service: String,
    /// Remove installed rules, routes and addresses on `close`.
    pub teardown_on_close: bool,
    pub command_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            outbound_interface: None,
            forwarding_policy: ForwardingPolicy::BestEffort,
            manage_dns: false,
            resolv_conf: PathBuf::from(RESOLV_CONF),
            resolv_conf_backup: PathBuf::from(RESOLV_CONF_BACKUP),
            resolver_service: RESOLVER_SERVICE.to_string(),
            teardown_on_close: true,
            command_timeout_secs: COMMAND_TIMEOUT_SECS,
        }
    }
}

impl RouterConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
