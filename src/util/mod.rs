//! Utility functions and helpers.

mod logging;
mod request_id;
mod shutdown;

pub use logging::init_logging;
pub use request_id::{REQUEST_ID_HEADER, RequestId};
pub use shutdown::{ShutdownSignal, wait_for_signal};
