//! pairsync listener protocol
//!
//! The server streams three kinds of events for a listen query:
//! ```text
//! welcome     # subscription established, state may be fetched
//! mutation    # one document changed as part of a transaction
//! reconnect   # the connection dropped and is being re-established
//! ```
//!
//! This crate turns that raw stream into ordered, transaction-consistent
//! events for one draft/published pair. It is pure: no I/O happens here.

pub mod error;
pub mod event;
pub mod grouping;
pub mod listener;
pub mod sse;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{
    EffectFormat, Effects, EventNumber, ListenerEvent, MutationEvent, ServerEvent, SnapshotEvent,
    Transition, Visibility,
};
pub use grouping::TransactionGrouper;
pub use listener::{ListenerAction, ListenerPhase, PairListener};
pub use sse::{encode_event, SseDecoder};
