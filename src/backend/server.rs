//! A single upstream server.

use crate::backend::address::{AddressError, parse_address};
use crate::backend::probe::Probe;
use hyper::Uri;
use std::fmt;
use std::sync::Arc;

/// One upstream target: an immutable address plus a liveness capability.
///
/// Liveness is never cached here; every [`Backend::is_alive`] call asks the
/// probe again.
#[derive(Clone)]
pub struct Backend {
    address: Uri,
    probe: Arc<dyn Probe>,
}

impl Backend {
    pub fn new(address: Uri, probe: Arc<dyn Probe>) -> Self {
        Self { address, probe }
    }

    /// Parse `address` and build a backend from it.
    pub fn parse(address: &str, probe: Arc<dyn Probe>) -> Result<Self, AddressError> {
        Ok(Self::new(parse_address(address)?, probe))
    }

    pub fn address(&self) -> &Uri {
        &self.address
    }

    /// Probe the backend. Transport failures and unexpected statuses are `false`.
    pub async fn is_alive(&self) -> bool {
        self.probe.is_alive(&self.address).await
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}
