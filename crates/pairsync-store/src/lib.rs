//! pairsync Store - Optimistic editing of draft/published document pairs
//!
//! This crate provides the editor-facing layer:
//! - Buffered documents applying local edits ahead of the server
//! - Document pairs sharing one listener subscription per id
//! - Consistency tracking and guarded document operations
//! - Edit state with validation

pub mod buffered;
pub mod config;
pub mod consistency;
pub mod edit_state;
pub mod error;
pub mod operations;
pub mod pair;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validation;

pub use buffered::{BufferedDocument, BufferedEvent, CommitOutcome, MutationOrigin};
pub use config::StoreConfig;
pub use consistency::{ConsistencyState, ConsistencyStatus, ConsistencyTracker};
pub use edit_state::{EditState, EditStateHandle};
pub use error::{Result, StoreError};
pub use operations::{
    Availability, DisabledReason, OperationArgs, OperationCall, OperationName, OperationResult,
    Operations, Snapshots,
};
pub use pair::{CommitRequest, DocumentPair, DocumentVersion, PairState, TaggedEvent, VersionEvent, VersionState};
pub use registry::{Lease, SharedCache};
pub use schema::{Schema, SchemaType};
pub use store::{DocumentStore, PairConsistency, PairLease, StoreBuilder};
pub use validation::{Marker, MarkerLevel, NoopValidator, RequiredFieldsValidator, ValidationStatus, Validator};
