//! External command execution.
//!
//! Every OS mutation the router performs is a single program invocation
//! (`ip`, `iptables`, `service`). The [`CommandRunner`] trait is the seam
//! between the reconciliation logic and the host, so tests can record
//! invocations instead of touching the routing table.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// A program plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a successful invocation (stdout followed by stderr).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub combined: String,
}

impl CommandOutput {
    pub fn new(combined: impl Into<String>) -> Self {
        Self {
            combined: combined.into(),
        }
    }
}

/// Command execution errors.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute {invocation}: {source}")]
    Spawn {
        invocation: Invocation,
        #[source]
        source: io::Error,
    },

    #[error("{invocation} failed with {status}: {output}")]
    Failed {
        invocation: Invocation,
        status: String,
        output: String,
    },

    #[error("{invocation} timed out after {timeout:?}")]
    Timeout {
        invocation: Invocation,
        timeout: Duration,
    },
}

impl CommandError {
    /// The invocation that failed.
    pub fn invocation(&self) -> &Invocation {
        match self {
            CommandError::Spawn { invocation, .. }
            | CommandError::Failed { invocation, .. }
            | CommandError::Timeout { invocation, .. } => invocation,
        }
    }
}

/// Runs a single network-configuration command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError>;
}

/// Runs commands on the host, killing any invocation that exceeds `timeout`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        debug!(command = %invocation, "Running command");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(CommandError::Spawn {
                    invocation: invocation.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(CommandError::Timeout {
                    invocation: invocation.clone(),
                    timeout: self.timeout,
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let status = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "signal".to_string(),
            };
            return Err(CommandError::Failed {
                invocation: invocation.clone(),
                status,
                output: combined.trim_end().to_string(),
            });
        }

        Ok(CommandOutput { combined })
    }
}
