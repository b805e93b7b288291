//! Pair listener state machine
//!
//! Feeds raw server events through connection tracking, snapshot fetching and
//! transaction grouping. The caller performs the fetches it is asked for and
//! reports the results back with [`PairListener::on_snapshots`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{ListenerEvent, MutationEvent, ServerEvent, SnapshotEvent};
use crate::grouping::TransactionGrouper;
use pairsync_core::{Document, IdPair};
use tracing::{debug, error, info, warn};

/// Connection phase of a pair listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Waiting for the server to confirm the subscription
    Connecting,
    /// Snapshots requested; mutations are held until they arrive
    Fetching { generation: u64 },
    /// Snapshots delivered; mutations flow through as groups complete
    Live,
}

/// Work produced by the listener for its driver
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerAction {
    Emit(ListenerEvent),
    /// Fetch the draft and published documents and report back with `generation`
    FetchSnapshots { generation: u64 },
}

/// Reducer turning server events for one pair into ordered listener events
#[derive(Debug)]
pub struct PairListener {
    id_pair: IdPair,
    phase: ListenerPhase,
    seen_first: bool,
    generation: u64,
    grouper: TransactionGrouper,
    /// Completed groups waiting for the snapshots of the current connection
    held: Vec<MutationEvent>,
}

impl PairListener {
    pub fn new(id_pair: IdPair) -> Self {
        Self {
            id_pair,
            phase: ListenerPhase::Connecting,
            seen_first: false,
            generation: 0,
            grouper: TransactionGrouper::new(),
            held: Vec::new(),
        }
    }

    pub fn id_pair(&self) -> &IdPair {
        &self.id_pair
    }

    pub fn phase(&self) -> ListenerPhase {
        self.phase
    }

    /// Number of mutation events waiting on a snapshot fetch
    pub fn held_events(&self) -> usize {
        self.held.len()
    }

    /// Handle one event from the server stream
    pub fn on_server_event(&mut self, event: ServerEvent) -> ProtocolResult<Vec<ListenerAction>> {
        if !self.seen_first {
            if let ServerEvent::Mutation(_) = event {
                error!(
                    id = %self.id_pair,
                    kind = event.kind(),
                    "Listener stream did not start with welcome or reconnect"
                );
                return Err(ProtocolError::UnexpectedFirstEvent(event.kind().to_string()));
            }
            self.seen_first = true;
        }

        match event {
            ServerEvent::Welcome { listener_name } => {
                self.generation += 1;
                self.grouper.set_epoch(self.generation);
                self.phase = ListenerPhase::Fetching {
                    generation: self.generation,
                };
                debug!(
                    id = %self.id_pair,
                    listener = listener_name.as_deref().unwrap_or("-"),
                    generation = self.generation,
                    "Listener connected, fetching snapshots"
                );
                Ok(vec![ListenerAction::FetchSnapshots {
                    generation: self.generation,
                }])
            }
            ServerEvent::Reconnect => {
                let dropped = self.grouper.clear() + self.held.len();
                self.held.clear();
                self.phase = ListenerPhase::Connecting;
                info!(id = %self.id_pair, dropped, "Listener reconnecting");
                Ok(vec![ListenerAction::Emit(ListenerEvent::Reconnect)])
            }
            ServerEvent::Mutation(mutation) => Ok(self.on_mutation(mutation)),
        }
    }

    fn on_mutation(&mut self, mutation: MutationEvent) -> Vec<ListenerAction> {
        if !self.id_pair.contains(&mutation.document_id) {
            warn!(
                id = %self.id_pair,
                doc_id = %mutation.document_id,
                "Ignoring mutation for a document outside the pair"
            );
            return Vec::new();
        }

        let mutation = mutation.normalize(&self.id_pair);
        let Some(group) = self.grouper.push(mutation) else {
            return Vec::new();
        };

        match self.phase {
            ListenerPhase::Live => group
                .into_iter()
                .map(|m| ListenerAction::Emit(ListenerEvent::Mutation(m)))
                .collect(),
            _ => {
                debug!(
                    id = %self.id_pair,
                    count = group.len(),
                    "Holding mutations until snapshots arrive"
                );
                self.held.extend(group);
                Vec::new()
            }
        }
    }

    /// Deliver fetched snapshots, returning the events to emit.
    ///
    /// Results for a superseded fetch are ignored.
    pub fn on_snapshots(
        &mut self,
        generation: u64,
        draft: Option<Document>,
        published: Option<Document>,
    ) -> Vec<ListenerEvent> {
        if self.phase != (ListenerPhase::Fetching { generation }) {
            debug!(
                id = %self.id_pair,
                generation,
                current = self.generation,
                "Discarding stale snapshot fetch"
            );
            return Vec::new();
        }

        self.phase = ListenerPhase::Live;

        // Members of transactions from before this connection can no longer complete
        let dropped = self.grouper.evict_before(generation);
        if dropped > 0 {
            warn!(id = %self.id_pair, dropped, "Dropped incomplete transactions from an earlier connection");
        }

        let mut events = Vec::with_capacity(2 + self.held.len());
        events.push(ListenerEvent::Snapshot(SnapshotEvent {
            document_id: self.id_pair.draft_id.clone(),
            document: draft,
        }));
        events.push(ListenerEvent::Snapshot(SnapshotEvent {
            document_id: self.id_pair.published_id.clone(),
            document: published,
        }));
        events.extend(self.held.drain(..).map(ListenerEvent::Mutation));
        events
    }
}
