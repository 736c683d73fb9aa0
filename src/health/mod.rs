//! Health checking for backend servers.
//!
//! In on-demand mode backends are probed directly by the selector and none
//! of this runs. In background mode [`HealthChecker`] probes on an interval
//! and [`CachedProbe`] serves the stored result.

mod cached;
mod checker;
mod state;

pub use cached::CachedProbe;
pub use checker::HealthChecker;
pub use state::{HealthConfig, HealthSnapshot, HealthState};
