//! Backend pool and round-robin selection.

mod address;
mod probe;
mod selector;
mod server;

pub use address::{AddressError, parse_address};
pub(crate) use address::connect_target;
pub use probe::{HttpProbe, Probe, ProbeError};
pub use selector::{SelectError, Selector, SelectorError};
pub use server::Backend;
