//! Frontend listener.
//!
//! The single inbound HTTP endpoint. Every path is routed through backend
//! selection and the proxy transport.

mod listener;

pub use listener::FrontendListener;
