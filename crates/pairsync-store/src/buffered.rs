//! Buffered document
//!
//! Optimistic replica of one document version. Local edits are applied
//! immediately and kept until the server has acknowledged them; remote
//! mutations are applied underneath pending edits.
//!
//! ```text
//! local = base ⊕ submitted ⊕ pending
//! ```
//! `submitted` holds committed mutations whose echo has not been seen yet,
//! `pending` holds edits not yet handed to a commit.

use pairsync_core::{Document, Mutation, MutationOp};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Where a mutation applied to the local state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOrigin {
    Local,
    Remote,
}

/// State change of a buffered document
#[derive(Debug, Clone, PartialEq)]
pub enum BufferedEvent {
    /// Fresh server state with no local edits on top
    Snapshot { document: Option<Document> },
    Mutation {
        origin: MutationOrigin,
        mutations: Vec<MutationOp>,
        document: Option<Document>,
    },
    /// Local edits replayed on a changed base
    Rebase {
        remote_mutations: Vec<MutationOp>,
        local_mutations: Vec<MutationOp>,
        document: Option<Document>,
    },
    Committed { transaction_id: String },
}

/// What a `commit()` call requires from the caller
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Nothing to commit and nothing in flight
    Idle,
    /// Nothing new; the in-flight commit covers every edit
    AwaitInFlight,
    /// A commit is in flight; pending edits go out once it settles
    Queued,
    /// Send this mutation to the server
    Submit(Mutation),
}

#[derive(Debug)]
struct Submitted {
    mutation: Mutation,
    acked: bool,
}

/// Optimistic state machine for one document version
#[derive(Debug)]
pub struct BufferedDocument {
    id: String,
    ready: bool,
    base: Option<Document>,
    submitted: VecDeque<Submitted>,
    pending: Vec<MutationOp>,
    local: Option<Document>,
    in_flight: Option<String>,
    commit_queued: bool,
}

impl BufferedDocument {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ready: false,
            base: None,
            submitted: VecDeque::new(),
            pending: Vec::new(),
            local: None,
            in_flight: None,
            commit_queued: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once the first snapshot has arrived
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Last known server state
    pub fn base(&self) -> Option<&Document> {
        self.base.as_ref()
    }

    /// Server state with every local edit applied
    pub fn local(&self) -> Option<&Document> {
        self.local.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn commit_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// No edits waiting for a commit and no commit waiting for the server
    pub fn is_consistent(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    /// Stage a local edit
    pub fn add_mutation(&mut self, op: MutationOp) -> Vec<BufferedEvent> {
        self.add_mutations(vec![op])
    }

    /// Stage several local edits as one change
    pub fn add_mutations(&mut self, ops: Vec<MutationOp>) -> Vec<BufferedEvent> {
        if ops.is_empty() {
            return Vec::new();
        }
        self.local = apply_ops(&self.id, self.local.take(), &ops);
        self.pending.extend(ops.iter().cloned());
        debug!(doc_id = %self.id, pending = self.pending.len(), "Staged local mutation");

        vec![BufferedEvent::Mutation {
            origin: MutationOrigin::Local,
            mutations: ops,
            document: self.local.clone(),
        }]
    }

    /// Package pending edits for the server; at most one commit is in flight
    pub fn commit(&mut self) -> CommitOutcome {
        if self.pending.is_empty() {
            return match self.in_flight {
                Some(_) => CommitOutcome::AwaitInFlight,
                None => CommitOutcome::Idle,
            };
        }

        if self.in_flight.is_some() {
            self.commit_queued = true;
            return CommitOutcome::Queued;
        }

        let mutation = Mutation::local(std::mem::take(&mut self.pending));
        self.in_flight = Some(mutation.transaction_id.clone());
        self.submitted.push_back(Submitted {
            mutation: mutation.clone(),
            acked: false,
        });
        debug!(
            doc_id = %self.id,
            transaction_id = %mutation.transaction_id,
            ops = mutation.mutations.len(),
            "Submitting commit"
        );
        CommitOutcome::Submit(mutation)
    }

    /// Whether a follow-up commit was requested while one was in flight
    pub fn take_queued(&mut self) -> bool {
        std::mem::take(&mut self.commit_queued)
    }

    /// The server accepted the in-flight commit
    pub fn on_commit_success(&mut self, transaction_id: &str) -> Vec<BufferedEvent> {
        if self.in_flight.as_deref() == Some(transaction_id) {
            self.in_flight = None;
        } else {
            warn!(doc_id = %self.id, transaction_id, "Acknowledgement for unknown commit");
        }

        if let Some(entry) = self
            .submitted
            .iter_mut()
            .find(|s| s.mutation.transaction_id == transaction_id)
        {
            entry.acked = true;
        }

        vec![BufferedEvent::Committed {
            transaction_id: transaction_id.to_string(),
        }]
    }

    /// The server rejected the in-flight commit; its edits become pending again
    pub fn on_commit_failure(&mut self, transaction_id: &str) -> Vec<BufferedEvent> {
        if self.in_flight.as_deref() == Some(transaction_id) {
            self.in_flight = None;
        }
        self.commit_queued = false;

        if let Some(pos) = self
            .submitted
            .iter()
            .position(|s| s.mutation.transaction_id == transaction_id)
        {
            if let Some(failed) = self.submitted.remove(pos) {
                let mut ops = failed.mutation.mutations;
                ops.append(&mut self.pending);
                self.pending = ops;
            }
            self.local = self.recompute();
        }

        warn!(
            doc_id = %self.id,
            transaction_id,
            pending = self.pending.len(),
            "Commit failed, edits kept for retry"
        );
        Vec::new()
    }

    /// The server refused the in-flight commit; its edits are dropped
    pub fn on_commit_cancelled(&mut self, transaction_id: &str) -> Vec<BufferedEvent> {
        if self.in_flight.as_deref() == Some(transaction_id) {
            self.in_flight = None;
        }
        self.commit_queued = false;

        let Some(pos) = self
            .submitted
            .iter()
            .position(|s| s.mutation.transaction_id == transaction_id)
        else {
            return Vec::new();
        };
        self.submitted.remove(pos);
        self.local = self.recompute();

        warn!(
            doc_id = %self.id,
            transaction_id,
            pending = self.pending.len(),
            "Commit rejected, edits dropped"
        );
        vec![BufferedEvent::Rebase {
            remote_mutations: Vec::new(),
            local_mutations: self.local_mutations(),
            document: self.local.clone(),
        }]
    }

    /// New server state from a (re)connection
    pub fn on_snapshot(&mut self, document: Option<Document>) -> Vec<BufferedEvent> {
        self.ready = true;
        self.base = document;
        self.submitted.retain(|s| !s.acked);
        self.local = self.recompute();

        if self.has_local_edits() {
            debug!(doc_id = %self.id, "Rebasing local edits on new snapshot");
            vec![BufferedEvent::Rebase {
                remote_mutations: Vec::new(),
                local_mutations: self.local_mutations(),
                document: self.local.clone(),
            }]
        } else {
            vec![BufferedEvent::Snapshot {
                document: self.local.clone(),
            }]
        }
    }

    /// A mutation observed on the listener
    pub fn on_remote_mutation(&mut self, mutation: Mutation) -> Vec<BufferedEvent> {
        if !self.ready {
            warn!(
                doc_id = %self.id,
                transaction_id = %mutation.transaction_id,
                "Mutation before first snapshot ignored"
            );
            return Vec::new();
        }

        let own = self
            .submitted
            .iter()
            .position(|s| s.mutation.transaction_id == mutation.transaction_id);
        if let Some(pos) = own {
            self.submitted.remove(pos);
        }

        let base_rev = self.base.as_ref().and_then(Document::rev);
        if mutation.result_rev.is_some() && mutation.result_rev.as_deref() == base_rev {
            debug!(
                doc_id = %self.id,
                transaction_id = %mutation.transaction_id,
                "Mutation already reflected in base"
            );
        } else {
            if let (Some(previous), Some(base_rev)) = (mutation.previous_rev.as_deref(), base_rev) {
                if previous != base_rev {
                    warn!(
                        doc_id = %self.id,
                        previous_rev = previous,
                        base_rev,
                        "Mutation out of sequence with base revision"
                    );
                }
            }
            self.base = mutation.apply_to(&self.id, self.base.take());
        }

        let previous = self.local.take();
        self.local = self.recompute();

        if own == Some(0) {
            debug!(
                doc_id = %self.id,
                transaction_id = %mutation.transaction_id,
                "Own mutation confirmed"
            );
            return Vec::new();
        }

        let remote_mutations: Vec<MutationOp> = mutation
            .mutations
            .into_iter()
            .filter(|op| op.target_id() == Some(self.id.as_str()))
            .collect();

        if !self.has_local_edits() {
            return vec![BufferedEvent::Mutation {
                origin: MutationOrigin::Remote,
                mutations: remote_mutations,
                document: self.local.clone(),
            }];
        }

        if self.local == previous {
            return Vec::new();
        }

        debug!(doc_id = %self.id, "Rebasing local edits on remote mutation");
        vec![BufferedEvent::Rebase {
            remote_mutations,
            local_mutations: self.local_mutations(),
            document: self.local.clone(),
        }]
    }

    fn has_local_edits(&self) -> bool {
        !self.pending.is_empty() || !self.submitted.is_empty()
    }

    fn local_mutations(&self) -> Vec<MutationOp> {
        let mut ops = Mutation::flatten(self.submitted.iter().map(|s| &s.mutation));
        ops.extend(self.pending.iter().cloned());
        ops
    }

    fn recompute(&self) -> Option<Document> {
        let with_submitted = Mutation::apply_all(
            &self.id,
            self.base.clone(),
            self.submitted.iter().map(|s| &s.mutation),
        );
        apply_ops(&self.id, with_submitted, &self.pending)
    }
}

fn apply_ops(id: &str, doc: Option<Document>, ops: &[MutationOp]) -> Option<Document> {
    ops.iter()
        .filter(|op| op.target_id() == Some(id))
        .fold(doc, |doc, op| op.apply(doc))
}
