//! Round-robin backend selection with liveness skipping.

use crate::backend::probe::Probe;
use crate::backend::server::Backend;
use crate::config::BackendConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors building a selector.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("backend pool must contain at least one server")]
    EmptyPool,

    #[error(transparent)]
    Address(#[from] crate::backend::AddressError),
}

/// Errors choosing a backend for a request.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no available backend ({attempts} probed, none alive)")]
    NoAvailableBackend { attempts: usize },
}

/// Picks the next live backend from a fixed pool.
///
/// A call claims one starting slot with a single atomic increment and then
/// walks the pool from there, so every call covers each backend exactly once
/// even while other callers advance the cursor. Each further attempt still
/// moves the cursor one step. Probing happens without holding anything.
pub struct Selector {
    pool: Vec<Backend>,
    cursor: AtomicU64,
}

impl Selector {
    /// Create a selector over `pool`, in the given order.
    pub fn new(pool: Vec<Backend>) -> Result<Self, SelectorError> {
        if pool.is_empty() {
            return Err(SelectorError::EmptyPool);
        }

        Ok(Self {
            pool,
            cursor: AtomicU64::new(0),
        })
    }

    /// Build a selector from configured addresses, all sharing one probe.
    pub fn from_config(
        backends: &[BackendConfig],
        probe: Arc<dyn Probe>,
    ) -> Result<Self, SelectorError> {
        let pool = backends
            .iter()
            .map(|b| Backend::parse(&b.address, Arc::clone(&probe)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(pool)
    }

    /// Select the next live backend.
    ///
    /// Scans in pool order from the cursor, wrapping around, and gives up
    /// after one full sweep (`len` probes) with
    /// [`SelectError::NoAvailableBackend`].
    #[instrument(skip_all, fields(pool = self.pool.len()))]
    pub async fn next(&self) -> Result<&Backend, SelectError> {
        let len = self.pool.len();
        let start = self.cursor.fetch_add(1, Ordering::AcqRel);

        for offset in 0..len {
            if offset > 0 {
                self.cursor.fetch_add(1, Ordering::AcqRel);
            }

            let position = start + offset as u64;
            let index = (position % len as u64) as usize;
            let backend = &self.pool[index];
            let attempt = offset + 1;

            if backend.is_alive().await {
                debug!(index, position, attempt, backend = %backend, "selected backend");
                return Ok(backend);
            }

            debug!(index, position, attempt, backend = %backend, "skipping dead backend");
        }

        warn!(attempts = len, "no live backend after a full sweep");
        Err(SelectError::NoAvailableBackend { attempts: len })
    }

    /// Number of selection attempts made so far.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Always false; a selector cannot be built over an empty pool.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
