//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{MetricsCollector, SelectionOutcome};
pub use server::MetricsServer;
