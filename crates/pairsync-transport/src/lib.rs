//! pairsync Transport Layer
//!
//! Connects the sync core to a content server:
//! - `Transport`: the listen/fetch/commit primitives a server provides
//! - `ListenerChannel`: ordered, transaction-consistent events for one pair
//! - `MemoryTransport`: in-process server (default feature `memory`)

pub mod channel;
pub mod error;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(test)]
mod scripted;
pub mod transport;

pub use channel::ListenerChannel;
pub use error::{Result, TransportError};
#[cfg(feature = "memory")]
pub use memory::MemoryTransport;
pub use transport::{
    CommitAck, CommitOptions, CommitVisibility, EventStream, ListenQuery, Transport,
};
