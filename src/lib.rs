//! rrlb - a round-robin HTTP reverse-proxy load balancer
//!
//! This crate provides:
//! - A fixed, ordered backend pool with round-robin selection that skips
//!   backends failing a liveness probe and fails fast when none are alive
//! - On-demand or background (cached) HTTP liveness probing
//! - An HTTP/1.1 reverse-proxy transport
//! - YAML configuration, structured logging and optional Prometheus metrics

pub mod backend;
pub mod config;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use backend::{Backend, Selector};
pub use config::Config;
