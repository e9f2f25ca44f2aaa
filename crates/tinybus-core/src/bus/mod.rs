//! Bus implementations.
//!
//! - [`MemoryBus`]: in-process bus for tests and embedding.
//! - [`BusDaemon`] + [`TcpTransport`]: a standalone bus over TCP using
//!   length-prefixed JSON frames (see [`wire`]).
//!
//! Both route through the same [`Router`].

mod daemon;
mod memory;
mod router;
mod tcp;
pub mod wire;

pub use daemon::{BusDaemon, BusDaemonHandle};
pub use memory::{MemoryBus, MemoryTransport};
pub use router::{Router, BUS_NAME};
pub use tcp::{connect_tcp, TcpTransport};
