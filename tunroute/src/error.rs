//! Error types for tunroute.

use crate::command::CommandError;
use crate::dns::ResolverError;
use crate::state::Lifecycle;
use std::io;
use thiserror::Error;

/// Main error type for router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("cannot {operation} while router is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: Lifecycle,
    },

    #[error("failed to look up tunnel interface name: {0}")]
    Device(#[source] io::Error),

    #[error("failed to bring up interface {iface}: {source}")]
    InterfaceUp {
        iface: String,
        #[source]
        source: CommandError,
    },

    #[error("forwarding setup failed: {0}")]
    Forwarding(#[source] CommandError),

    #[error("no outbound interface configured and none could be resolved")]
    NoOutboundInterface,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("resolver configuration failed: {0}")]
    Resolver(#[from] ResolverError),
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Keeps the first error of a multi-step operation; later ones are dropped.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<RouterError>);

impl FirstError {
    pub(crate) fn record(&mut self, err: impl Into<RouterError>) {
        if self.0.is_none() {
            self.0 = Some(err.into());
        }
    }

    pub(crate) fn into_result(self) -> Result<()> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
