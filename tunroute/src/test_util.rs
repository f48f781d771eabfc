//! Test utilities for tunroute integration tests.
//!
//! Provides a command runner that records invocations instead of touching
//! the host, and tunnel devices with fixed names.

use crate::command::{CommandError, CommandOutput, CommandRunner, Invocation};
use crate::router::TunnelDevice;
use async_trait::async_trait;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Interface name used by tests.
pub const TEST_IFACE: &str = "tun0";

/// Records every invocation; fails or answers based on command prefixes.
#[derive(Debug, Default)]
pub struct FakeRunner {
    log: Mutex<Vec<Invocation>>,
    failures: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, String)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every invocation whose rendered command starts with `prefix`.
    pub fn fail_on(&self, prefix: impl Into<String>) {
        lock(&self.failures).push(prefix.into());
    }

    /// Stop failing any command.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Answer invocations starting with `prefix` with `output`.
    pub fn respond(&self, prefix: impl Into<String>, output: impl Into<String>) {
        lock(&self.responses).push((prefix.into(), output.into()));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.log).clone()
    }

    /// Rendered commands in execution order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.log).iter().map(ToString::to_string).collect()
    }

    /// Rendered commands starting with `prefix`.
    pub fn commands_matching(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Forget recorded invocations.
    pub fn clear(&self) {
        lock(&self.log).clear();
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        lock(&self.log).push(invocation.clone());
        let rendered = invocation.to_string();

        if lock(&self.failures)
            .iter()
            .any(|prefix| rendered.starts_with(prefix.as_str()))
        {
            return Err(CommandError::Failed {
                invocation: invocation.clone(),
                status: "exit code 2".to_string(),
                output: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }

        let output = lock(&self.responses)
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CommandOutput::new(output))
    }
}

/// A tunnel device with a fixed interface name.
#[derive(Debug, Clone)]
pub struct NamedDevice(pub String);

impl Default for NamedDevice {
    fn default() -> Self {
        NamedDevice(TEST_IFACE.to_string())
    }
}

impl TunnelDevice for NamedDevice {
    fn name(&self) -> io::Result<String> {
        Ok(self.0.clone())
    }
}

/// A tunnel device whose name lookup always fails.
#[derive(Debug, Clone, Default)]
pub struct DetachedDevice;

impl TunnelDevice for DetachedDevice {
    fn name(&self) -> io::Result<String> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "tunnel device has no interface",
        ))
    }
}
