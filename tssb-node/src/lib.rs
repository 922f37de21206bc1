#![forbid(unsafe_code)]

//! The node: peering, replication, and the sliding-window session layer
//! built on top of it.

mod error;
mod node;
mod session;

pub use error::{NodeError, SessionError};
pub use node::{DmxActionSpec, EntryListener, Node};
pub use session::{SlidingWindow, DEFAULT_WINDOW_LEN};
