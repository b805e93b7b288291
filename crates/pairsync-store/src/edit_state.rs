//! Edit state
//!
//! What an editor shows for one pair: both versions, whether the type is
//! edited live, readiness and validation of the displayed document.

use crate::error::{Result, StoreError};
use crate::pair::PairState;
use crate::schema::SchemaType;
use crate::store::PairLease;
use crate::validation::{ValidationStatus, Validator};
use pairsync_core::Document;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct EditState {
    pub id: String,
    pub type_name: String,
    pub draft: Option<Document>,
    pub published: Option<Document>,
    pub live_edit: bool,
    pub ready: bool,
    pub validation: ValidationStatus,
}

impl EditState {
    fn new(id: String, schema_type: &SchemaType) -> Self {
        Self {
            id,
            type_name: schema_type.name.clone(),
            draft: None,
            published: None,
            live_edit: schema_type.live_edit,
            ready: false,
            validation: ValidationStatus::default(),
        }
    }

    /// The document an editor displays: the draft if there is one
    pub fn displayed(&self) -> Option<&Document> {
        self.draft.as_ref().or(self.published.as_ref())
    }
}

/// Live edit state of a checked-out pair
pub struct EditStateHandle {
    state: watch::Receiver<EditState>,
    task: JoinHandle<()>,
    _pair: PairLease,
}

impl EditStateHandle {
    pub(crate) fn spawn(pair: PairLease, schema_type: SchemaType, validator: Arc<dyn Validator>) -> Self {
        let initial = EditState::new(pair.id_pair().published_id.clone(), &schema_type);
        let (tx, state) = watch::channel(initial);
        let task = tokio::spawn(follow(pair.watch_state(), tx, schema_type, validator));
        Self {
            state,
            task,
            _pair: pair,
        }
    }

    pub fn current(&self) -> EditState {
        self.state.borrow().clone()
    }

    /// Wait for the next change and return the new state
    pub async fn changed(&mut self) -> Result<EditState> {
        self.state.changed().await.map_err(|_| StoreError::Closed)?;
        Ok(self.state.borrow_and_update().clone())
    }

    /// Resolve once `f` holds for the current state
    pub async fn wait_for(&mut self, f: impl FnMut(&EditState) -> bool) -> Result<EditState> {
        self.state
            .wait_for(f)
            .await
            .map(|state| state.clone())
            .map_err(|_| StoreError::Closed)
    }

    pub fn subscribe(&self) -> watch::Receiver<EditState> {
        self.state.clone()
    }
}

impl Drop for EditStateHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn follow(
    mut pair: watch::Receiver<PairState>,
    tx: watch::Sender<EditState>,
    schema_type: SchemaType,
    validator: Arc<dyn Validator>,
) {
    let mut validated: Option<Option<Document>> = None;

    'outer: loop {
        let displayed = update_documents(&tx, &pair.borrow_and_update(), &validated);

        if validated.as_ref() != Some(&displayed) {
            let markers = {
                let validation = async {
                    match &displayed {
                        Some(document) => validator.validate(document, &schema_type).await,
                        None => Vec::new(),
                    }
                };
                tokio::pin!(validation);

                // Pair changes keep flowing while the validator runs
                loop {
                    tokio::select! {
                        markers = &mut validation => break markers,
                        changed = pair.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            let latest = update_documents(&tx, &pair.borrow_and_update(), &validated);
                            if latest != displayed {
                                debug!(type_name = %schema_type.name, "Displayed document changed, restarting validation");
                                continue 'outer;
                            }
                        }
                    }
                }
            };

            debug!(type_name = %schema_type.name, markers = markers.len(), "Validated document");
            tx.send_modify(|state| {
                state.validation = ValidationStatus {
                    is_validating: false,
                    markers,
                }
            });
            validated = Some(displayed);
        }

        if pair.changed().await.is_err() {
            break;
        }
    }
}

/// Copy the pair's documents into the edit state, returning the displayed one.
///
/// Validation is marked as running exactly when the displayed document differs
/// from the last validated one, in the same update so waiters never see stale markers.
fn update_documents(
    tx: &watch::Sender<EditState>,
    snapshot: &PairState,
    validated: &Option<Option<Document>>,
) -> Option<Document> {
    let draft = snapshot.draft.document.clone();
    let published = snapshot.published.document.clone();
    let displayed = draft.clone().or_else(|| published.clone());
    let revalidate = validated.as_ref() != Some(&displayed);

    tx.send_modify(|state| {
        state.draft = draft;
        state.published = published;
        state.ready = snapshot.is_ready();
        state.validation.is_validating = revalidate;
    });
    displayed
}
