//! pairsync Core - Document identity and mutation semantics
//!
//! This crate provides the data model shared by every pairsync layer:
//! - The draft/published identity convention (`drafts.` prefix)
//! - Schemaless JSON documents with path addressing
//! - Mutation operations and their optimistic local application

pub mod document;
pub mod error;
pub mod id;
pub mod mutation;
pub mod path;

pub use document::Document;
pub use error::{Error, Result};
pub use id::{is_draft_id, to_draft_id, to_published_id, DocumentVariant, IdPair, DRAFTS_PREFIX};
pub use mutation::{
    new_transaction_id, timestamp_now, InsertPatch, InsertPosition, Mutation, MutationOp, Patch,
};
pub use path::PathSegment;
