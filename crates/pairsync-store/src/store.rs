//! Document store
//!
//! Entry point for editors. Pairs are shared: checking out the same id twice
//! yields the same pair and a single server subscription, and the pair is
//! disposed when the last lease on it is dropped.

use crate::config::StoreConfig;
use crate::consistency::ConsistencyStatus;
use crate::edit_state::EditStateHandle;
use crate::error::{Result, StoreError};
use crate::operations::{OperationContext, OperationPipeline, OperationResult, Operations};
use crate::pair::DocumentPair;
use crate::registry::{Lease, SharedCache};
use crate::schema::Schema;
use crate::validation::{RequiredFieldsValidator, Validator};
use pairsync_core::IdPair;
use pairsync_transport::Transport;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::info;

/// A counted reference to a checked-out pair
pub type PairLease = Lease<IdPair, DocumentPair>;

/// Consistency status bound to a lease on its pair
pub struct PairConsistency {
    status: ConsistencyStatus,
    _pair: PairLease,
}

impl Deref for PairConsistency {
    type Target = ConsistencyStatus;

    fn deref(&self) -> &ConsistencyStatus {
        &self.status
    }
}

impl DerefMut for PairConsistency {
    fn deref_mut(&mut self) -> &mut ConsistencyStatus {
        &mut self.status
    }
}

/// Builder for [`DocumentStore`]
pub struct StoreBuilder {
    transport: Arc<dyn Transport>,
    config: StoreConfig,
    schema: Option<Schema>,
    validator: Arc<dyn Validator>,
}

impl StoreBuilder {
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Schema used for live-edit lookup and validation.
    ///
    /// Without one, the live-edit types named in the config are used.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn build(self) -> DocumentStore {
        let schema = self.schema.unwrap_or_else(|| Schema::from_config(&self.config));
        let pipeline = OperationPipeline::new(self.config.event_buffer);
        info!(
            event_buffer = self.config.event_buffer,
            visibility = ?self.config.commit_visibility,
            "Document store ready"
        );

        DocumentStore {
            inner: Arc::new(StoreInner {
                transport: self.transport,
                config: Arc::new(self.config),
                schema,
                validator: self.validator,
                pairs: SharedCache::new(),
                pipeline: Arc::new(pipeline),
            }),
        }
    }
}

struct StoreInner {
    transport: Arc<dyn Transport>,
    config: Arc<StoreConfig>,
    schema: Schema,
    validator: Arc<dyn Validator>,
    pairs: SharedCache<IdPair, DocumentPair>,
    pipeline: Arc<OperationPipeline>,
}

/// Shared handle to the pairs, operations and results of one server
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    pub fn builder(transport: Arc<dyn Transport>) -> StoreBuilder {
        StoreBuilder {
            transport,
            config: StoreConfig::default(),
            schema: None,
            validator: Arc::new(RequiredFieldsValidator),
        }
    }

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Check out the draft/published pair for `id` (either form).
    ///
    /// A pair whose listener failed for good is replaced by a fresh one.
    pub fn checkout_pair(&self, id: &str) -> Result<PairLease> {
        let id_pair = IdPair::new(id)?;
        let lease = self.inner.pairs.acquire_fresh(
            id_pair.clone(),
            || {
                Ok::<_, StoreError>(DocumentPair::open(
                    self.inner.transport.clone(),
                    id_pair,
                    self.inner.config.clone(),
                ))
            },
            DocumentPair::is_terminated,
        )?;
        Ok(lease)
    }

    /// "Fully synced" signal of a pair; keeps the pair checked out while held
    pub fn consistency_status(&self, id: &str) -> Result<PairConsistency> {
        let pair = self.checkout_pair(id)?;
        Ok(PairConsistency {
            status: pair.consistency(),
            _pair: pair,
        })
    }

    /// Edit state of a pair as an editor for `type_name` sees it
    pub fn edit_state(&self, id: &str, type_name: &str) -> Result<EditStateHandle> {
        let pair = self.checkout_pair(id)?;
        Ok(EditStateHandle::spawn(
            pair,
            self.inner.schema.resolve(type_name),
            self.inner.validator.clone(),
        ))
    }

    /// Operations on a pair, guarded for `type_name`
    pub fn operations(&self, id: &str, type_name: &str) -> Result<Operations> {
        let pair = self.checkout_pair(id)?;
        let context = OperationContext {
            type_name: type_name.to_string(),
            live_edit: self.inner.schema.is_live_edit(type_name),
            transport: self.inner.transport.clone(),
            config: self.inner.config.clone(),
        };
        Ok(Operations::new(pair, context, self.inner.pipeline.clone()))
    }

    /// Results of every operation run through this store
    pub fn operation_results(&self) -> tokio::sync::broadcast::Receiver<OperationResult> {
        self.inner.pipeline.subscribe()
    }

    /// Number of pairs currently checked out
    pub fn open_pairs(&self) -> usize {
        self.inner.pairs.len()
    }
}
