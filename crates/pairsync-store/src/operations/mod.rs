//! Document operations
//!
//! Each operation has a guard (`disabled`) computed from the current state of
//! a pair and an `execute` step. Invocations run through the
//! [`OperationPipeline`], which waits for pending edits where needed and
//! reports every outcome as an [`OperationResult`].

mod commit;
mod delete;
mod discard_changes;
mod duplicate;
mod patch;
pub mod pipeline;
mod publish;
mod restore;
mod unpublish;

pub use pipeline::{OperationPipeline, OperationResult};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::pair::{DocumentPair, DocumentVersion, PairState};
use crate::store::PairLease;
use pairsync_core::{new_transaction_id, Document, IdPair, MutationOp, Patch};
use pairsync_transport::{CommitAck, CommitOptions, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::error;

/// Operation names, as they appear in results and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationName {
    Publish,
    Unpublish,
    Delete,
    DiscardChanges,
    Duplicate,
    Restore,
    Patch,
    Commit,
}

impl OperationName {
    pub const ALL: [OperationName; 8] = [
        OperationName::Publish,
        OperationName::Unpublish,
        OperationName::Delete,
        OperationName::DiscardChanges,
        OperationName::Duplicate,
        OperationName::Restore,
        OperationName::Patch,
        OperationName::Commit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::Publish => "publish",
            OperationName::Unpublish => "unpublish",
            OperationName::Delete => "delete",
            OperationName::DiscardChanges => "discardChanges",
            OperationName::Duplicate => "duplicate",
            OperationName::Restore => "restore",
            OperationName::Patch => "patch",
            OperationName::Commit => "commit",
        }
    }

    /// Operations that must not run ahead of unacknowledged local edits
    pub fn requires_consistency(&self) -> bool {
        matches!(
            self,
            OperationName::Publish
                | OperationName::Unpublish
                | OperationName::DiscardChanges
                | OperationName::Delete
        )
    }

    /// Whether this operation can run against `args`
    pub fn availability(&self, args: &OperationArgs) -> Availability {
        match self {
            OperationName::Publish => publish::disabled(args),
            OperationName::Unpublish => unpublish::disabled(args),
            OperationName::Delete => delete::disabled(args),
            OperationName::DiscardChanges => discard_changes::disabled(args),
            OperationName::Duplicate => duplicate::disabled(args),
            OperationName::Restore | OperationName::Patch | OperationName::Commit => {
                Availability::Enabled
            }
        }
    }

    pub(crate) fn disabled_error(self, reason: DisabledReason) -> StoreError {
        StoreError::OperationDisabled {
            operation: self,
            reason,
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation cannot run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisabledReason {
    NothingToDelete,
    NothingToDuplicate,
    AlreadyPublished,
    NoChanges,
    LiveEditEnabled,
    NotPublished,
}

impl DisabledReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisabledReason::NothingToDelete => "NOTHING_TO_DELETE",
            DisabledReason::NothingToDuplicate => "NOTHING_TO_DUPLICATE",
            DisabledReason::AlreadyPublished => "ALREADY_PUBLISHED",
            DisabledReason::NoChanges => "NO_CHANGES",
            DisabledReason::LiveEditEnabled => "LIVE_EDIT_ENABLED",
            DisabledReason::NotPublished => "NOT_PUBLISHED",
        }
    }
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an operation guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Enabled,
    Disabled(DisabledReason),
}

impl Availability {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Availability::Enabled)
    }

    pub fn reason(&self) -> Option<DisabledReason> {
        match self {
            Availability::Enabled => None,
            Availability::Disabled(reason) => Some(*reason),
        }
    }
}

/// Latest local documents of a pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshots {
    pub draft: Option<Document>,
    pub published: Option<Document>,
}

impl From<&PairState> for Snapshots {
    fn from(state: &PairState) -> Self {
        Self {
            draft: state.draft.document.clone(),
            published: state.published.document.clone(),
        }
    }
}

/// Per-type settings operations run with
#[derive(Clone)]
pub struct OperationContext {
    pub type_name: String,
    pub live_edit: bool,
    pub transport: Arc<dyn Transport>,
    pub config: Arc<StoreConfig>,
}

/// Everything an operation guard or body may look at
#[derive(Clone)]
pub struct OperationArgs {
    pub id_pair: IdPair,
    pub type_name: String,
    pub live_edit: bool,
    pub snapshots: Snapshots,
    pub draft: DocumentVersion,
    pub published: DocumentVersion,
    pub transport: Arc<dyn Transport>,
    pub config: Arc<StoreConfig>,
}

impl OperationArgs {
    pub fn new(pair: &DocumentPair, context: &OperationContext) -> Self {
        Self {
            id_pair: pair.id_pair().clone(),
            type_name: context.type_name.clone(),
            live_edit: context.live_edit,
            snapshots: Snapshots::from(&pair.state()),
            draft: pair.draft().clone(),
            published: pair.published().clone(),
            transport: context.transport.clone(),
            config: context.config.clone(),
        }
    }

    /// The version edits land on: published for live-edit types, else draft
    pub fn target(&self) -> &DocumentVersion {
        if self.live_edit {
            &self.published
        } else {
            &self.draft
        }
    }

    /// Local documents as of now, which may be newer than `snapshots`
    pub fn current_snapshots(&self) -> Snapshots {
        Snapshots {
            draft: self.draft.document(),
            published: self.published.document(),
        }
    }

    /// Send `ops` to the server as one transaction
    pub(crate) async fn submit(&self, ops: Vec<MutationOp>, action: &str) -> Result<CommitAck> {
        let options = CommitOptions {
            visibility: self.config.commit_visibility,
            transaction_id: Some(new_transaction_id()),
            tag: Some(self.config.tag_for(action)),
        };
        Ok(self.transport.commit(&ops, &options).await?)
    }
}

/// An operation invocation with its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum OperationCall {
    Publish,
    Unpublish,
    Delete,
    DiscardChanges,
    Duplicate { dupe_id: String },
    Restore { revision: String },
    Patch {
        patches: Vec<Patch>,
        initial: Option<Document>,
    },
    Commit,
}

impl OperationCall {
    pub fn name(&self) -> OperationName {
        match self {
            OperationCall::Publish => OperationName::Publish,
            OperationCall::Unpublish => OperationName::Unpublish,
            OperationCall::Delete => OperationName::Delete,
            OperationCall::DiscardChanges => OperationName::DiscardChanges,
            OperationCall::Duplicate { .. } => OperationName::Duplicate,
            OperationCall::Restore { .. } => OperationName::Restore,
            OperationCall::Patch { .. } => OperationName::Patch,
            OperationCall::Commit => OperationName::Commit,
        }
    }

    /// Check the guard against `args`, then run the operation body
    pub async fn execute(self, args: &OperationArgs) -> Result<()> {
        let name = self.name();
        if let Availability::Disabled(reason) = name.availability(args) {
            return Err(name.disabled_error(reason));
        }

        match self {
            OperationCall::Publish => publish::execute(args).await,
            OperationCall::Unpublish => unpublish::execute(args).await,
            OperationCall::Delete => delete::execute(args).await,
            OperationCall::DiscardChanges => discard_changes::execute(args).await,
            OperationCall::Duplicate { dupe_id } => duplicate::execute(args, &dupe_id).await,
            OperationCall::Restore { revision } => restore::execute(args, &revision).await,
            OperationCall::Patch { patches, initial } => patch::execute(args, patches, initial).await,
            OperationCall::Commit => commit::execute(args).await,
        }
    }
}

/// Operations bound to one checked-out pair and document type
pub struct Operations {
    pair: PairLease,
    context: OperationContext,
    pipeline: Arc<OperationPipeline>,
    state: watch::Receiver<PairState>,
}

impl Operations {
    pub(crate) fn new(pair: PairLease, context: OperationContext, pipeline: Arc<OperationPipeline>) -> Self {
        let state = pair.watch_state();
        Self {
            pair,
            context,
            pipeline,
            state,
        }
    }

    pub fn id_pair(&self) -> &IdPair {
        self.pair.id_pair()
    }

    /// Arguments built from the pair's current state
    pub fn args(&self) -> OperationArgs {
        OperationArgs::new(&self.pair, &self.context)
    }

    pub fn availability(&self, name: OperationName) -> Availability {
        name.availability(&self.args())
    }

    /// Availability of every operation
    pub fn all(&self) -> Vec<(OperationName, Availability)> {
        let args = self.args();
        OperationName::ALL
            .iter()
            .map(|name| (*name, name.availability(&args)))
            .collect()
    }

    /// Queue an operation; its outcome is reported on [`results`](Self::results).
    ///
    /// Calling a disabled operation is a caller bug and is refused up front.
    pub fn execute(&self, call: OperationCall) -> Result<()> {
        let name = call.name();
        if let Availability::Disabled(reason) = self.availability(name) {
            error!(
                id = %self.id_pair(),
                operation = %name,
                reason = %reason,
                "Attempted to execute disabled operation"
            );
            return Err(name.disabled_error(reason));
        }
        self.pipeline
            .dispatch(call, self.pair.clone(), self.context.clone())
    }

    /// Outcomes of operations on every pair of the store
    pub fn results(&self) -> broadcast::Receiver<OperationResult> {
        self.pipeline.subscribe()
    }

    /// Wait until the pair state, and with it the guards, may have changed
    pub async fn changed(&mut self) -> Result<()> {
        self.state.changed().await.map_err(|_| StoreError::Closed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use pairsync_transport::MemoryTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    /// A ready pair over `transport` plus a context for `type_name`
    pub(crate) async fn fixture(
        transport: &Arc<MemoryTransport>,
        type_name: &str,
        live_edit: bool,
    ) -> (DocumentPair, OperationContext) {
        let config = Arc::new(StoreConfig::default());
        let pair = DocumentPair::open(transport.clone(), IdPair::new("movie").unwrap(), config.clone());
        timeout(Duration::from_secs(5), pair.ready())
            .await
            .expect("pair never became ready")
            .unwrap();
        let context = OperationContext {
            type_name: type_name.to_string(),
            live_edit,
            transport: transport.clone(),
            config,
        };
        (pair, context)
    }

    /// Wait until the pair's local state satisfies `f`
    pub(crate) async fn settle(pair: &DocumentPair, f: impl Fn(&PairState) -> bool) {
        let mut rx = pair.watch_state();
        timeout(Duration::from_secs(5), rx.wait_for(|s| f(s)))
            .await
            .expect("timed out waiting for pair state")
            .unwrap();
    }

    #[test]
    fn test_names_and_reasons_display() {
        assert_eq!(OperationName::DiscardChanges.to_string(), "discardChanges");
        assert_eq!(DisabledReason::LiveEditEnabled.to_string(), "LIVE_EDIT_ENABLED");
        assert_eq!(
            serde_json::to_value(DisabledReason::NothingToDelete).unwrap(),
            serde_json::json!("NOTHING_TO_DELETE")
        );
        assert_eq!(
            serde_json::to_value(OperationName::Unpublish).unwrap(),
            serde_json::json!("unpublish")
        );
    }

    #[test]
    fn test_consistency_set() {
        let requiring: Vec<_> = OperationName::ALL
            .into_iter()
            .filter(OperationName::requires_consistency)
            .collect();
        assert_eq!(
            requiring,
            vec![
                OperationName::Publish,
                OperationName::Unpublish,
                OperationName::Delete,
                OperationName::DiscardChanges
            ]
        );
    }

    #[tokio::test]
    async fn test_guards_on_empty_pair() {
        let transport = Arc::new(MemoryTransport::new());
        let (pair, context) = fixture(&transport, "movie", false).await;
        let args = OperationArgs::new(&pair, &context);

        let reasons: Vec<_> = OperationName::ALL
            .iter()
            .map(|name| (*name, name.availability(&args).reason()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (OperationName::Publish, Some(DisabledReason::NoChanges)),
                (OperationName::Unpublish, Some(DisabledReason::NotPublished)),
                (OperationName::Delete, Some(DisabledReason::NothingToDelete)),
                (OperationName::DiscardChanges, Some(DisabledReason::NoChanges)),
                (OperationName::Duplicate, Some(DisabledReason::NothingToDuplicate)),
                (OperationName::Restore, None),
                (OperationName::Patch, None),
                (OperationName::Commit, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_rechecks_guard() {
        let transport = Arc::new(MemoryTransport::new());
        let (pair, context) = fixture(&transport, "movie", false).await;
        let args = OperationArgs::new(&pair, &context);

        let err = OperationCall::Delete.execute(&args).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::OperationDisabled {
                operation: OperationName::Delete,
                reason: DisabledReason::NothingToDelete
            }
        );
        assert_eq!(transport.commit_count(), 0);
    }
}
