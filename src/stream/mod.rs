//! Stream adapters used by the relay.

mod cap;

pub use cap::{CapPerWindow, RelayStreamExt};
