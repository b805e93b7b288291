//! In-memory content server
//!
//! Applies commits atomically, keeps every revision of every document and
//! streams mutation events to listeners in the same wire format as a remote
//! server. Intended for development, tests and the `pairsync` tool.

use crate::error::{Result, TransportError};
use crate::transport::{CommitAck, CommitOptions, EventStream, ListenQuery, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use pairsync_core::{new_transaction_id, timestamp_now, Document, MutationOp};
use pairsync_protocol::{encode_event, MutationEvent, ServerEvent, Transition, Visibility};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Capacity of the listener fan-out channel
const EVENT_CAPACITY: usize = 1024;

/// In-memory server implementing [`Transport`]
pub struct MemoryTransport {
    documents: DashMap<String, Document>,
    /// Every stored version per id, oldest first
    history: DashMap<String, Vec<Document>>,
    /// One message per transaction so listeners can number what they receive
    events: broadcast::Sender<Vec<ServerEvent>>,
    /// Serializes commits so multi-document transactions are atomic
    commit_lock: Mutex<()>,
    listen_count: AtomicUsize,
    commit_count: AtomicUsize,
    fail_next_commit: Mutex<Option<TransportError>>,
    fetch_gate: watch::Sender<bool>,
    commit_gate: watch::Sender<bool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (fetch_gate, _) = watch::channel(true);
        let (commit_gate, _) = watch::channel(true);

        Self {
            documents: DashMap::new(),
            history: DashMap::new(),
            events,
            commit_lock: Mutex::new(()),
            listen_count: AtomicUsize::new(0),
            commit_count: AtomicUsize::new(0),
            fail_next_commit: Mutex::new(None),
            fetch_gate,
            commit_gate,
        }
    }

    /// Store a document directly, without emitting events
    pub fn seed(&self, mut doc: Document) -> Result<()> {
        let id = doc
            .id()
            .map(str::to_string)
            .ok_or_else(|| TransportError::Codec("seed document without _id".into()))?;
        if doc.rev().is_none() {
            doc.set_rev(new_transaction_id());
        }
        self.store(&id, Some(doc));
        Ok(())
    }

    /// Current server-side state of a document
    pub fn document(&self, id: &str) -> Option<Document> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    /// Revisions stored for a document, oldest first
    pub fn revisions(&self, id: &str) -> Vec<String> {
        self.history
            .get(id)
            .map(|versions| {
                versions
                    .iter()
                    .filter_map(|doc| doc.rev().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of `listen` calls made so far
    pub fn listen_count(&self) -> usize {
        self.listen_count.load(Ordering::SeqCst)
    }

    /// Number of commits accepted so far
    pub fn commit_count(&self) -> usize {
        self.commit_count.load(Ordering::SeqCst)
    }

    /// Number of currently open listener streams
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Reject the next commit with `error`
    pub fn fail_next_commit(&self, error: TransportError) {
        *self.fail_next_commit.lock() = Some(error);
    }

    /// Tell every listener the connection dropped and was re-established
    pub fn simulate_reconnect(&self) {
        info!(listeners = self.listener_count(), "Simulating listener reconnect");
        let _ = self.events.send(vec![
            ServerEvent::Reconnect,
            ServerEvent::Welcome {
                listener_name: None,
            },
        ]);
    }

    /// Hold `fetch_many` calls until [`release_fetches`](Self::release_fetches)
    pub fn hold_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }

    /// Hold commits until [`release_commits`](Self::release_commits)
    pub fn hold_commits(&self) {
        self.commit_gate.send_replace(false);
    }

    pub fn release_commits(&self) {
        self.commit_gate.send_replace(true);
    }

    fn store(&self, id: &str, doc: Option<Document>) {
        match doc {
            Some(doc) => {
                self.history
                    .entry(id.to_string())
                    .or_default()
                    .push(doc.clone());
                self.documents.insert(id.to_string(), doc);
            }
            None => {
                self.documents.remove(id);
            }
        }
    }

    /// Apply a batch atomically and broadcast one event per touched document.
    ///
    /// Events carry their position over the whole transaction; each listener
    /// renumbers them over the documents it is subscribed to.
    fn apply(&self, mutations: &[MutationOp], options: &CommitOptions) -> Result<CommitAck> {
        let _guard = self.commit_lock.lock();

        let transaction_id = options
            .transaction_id
            .clone()
            .unwrap_or_else(new_transaction_id);
        let timestamp = timestamp_now();

        let mut order: Vec<String> = Vec::new();
        let mut before: HashMap<String, Option<Document>> = HashMap::new();
        let mut staged: HashMap<String, Option<Document>> = HashMap::new();

        for op in mutations {
            let id = op
                .target_id()
                .ok_or_else(|| TransportError::rejected(400, "mutation without document id"))?
                .to_string();

            if !staged.contains_key(&id) {
                let current = self.document(&id);
                before.insert(id.clone(), current.clone());
                staged.insert(id.clone(), current);
                order.push(id.clone());
            }

            let current = staged.remove(&id).flatten();
            op.check(current.as_ref())
                .map_err(|e| TransportError::rejected(409, e.to_string()))?;
            staged.insert(id, op.apply(current));
        }

        let total = order.len() as u32;
        let mut outgoing = Vec::with_capacity(order.len());

        for (index, id) in order.iter().enumerate() {
            let previous = before.remove(id).flatten();
            let next = staged.remove(id).flatten().map(|mut doc| {
                doc.set_rev(transaction_id.clone());
                doc.insert(Document::UPDATED_AT, Value::String(timestamp.clone()));
                doc
            });

            let transition = match (&previous, &next) {
                (None, Some(_)) => Transition::Appear,
                (Some(_), None) => Transition::Disappear,
                _ => Transition::Update,
            };

            outgoing.push(MutationEvent {
                document_id: id.clone(),
                transaction_id: transaction_id.clone(),
                mutations: mutations.to_vec(),
                effects: None,
                previous_rev: previous.as_ref().and_then(|d| d.rev().map(str::to_string)),
                result_rev: Some(transaction_id.clone()),
                timestamp: Some(timestamp.clone()),
                transition,
                visibility: Some(Visibility::Query),
                transaction_total_events: Some(total),
                transaction_current_event: Some(index as u32 + 1),
            });

            self.store(id, next);
        }

        self.commit_count.fetch_add(1, Ordering::SeqCst);
        debug!(
            transaction_id = %transaction_id,
            documents = total,
            visibility = ?options.visibility,
            tag = options.tag.as_deref().unwrap_or("-"),
            "Committed transaction"
        );

        let _ = self
            .events
            .send(outgoing.into_iter().map(ServerEvent::Mutation).collect());

        Ok(CommitAck {
            transaction_id,
            document_ids: order,
        })
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct ListenState {
    rx: broadcast::Receiver<Vec<ServerEvent>>,
    ids: HashSet<String>,
    queue: VecDeque<ServerEvent>,
}

fn frames(state: ListenState) -> EventStream {
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                let frame = encode_event(&event)
                    .map(Bytes::from)
                    .map_err(TransportError::from);
                return Some((frame, state));
            }

            match state.rx.recv().await {
                Ok(batch) => state.queue.extend(visible_events(batch, &state.ids)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Listener lagged behind, forcing reconnect");
                    state.queue.push_back(ServerEvent::Reconnect);
                    state.queue.push_back(ServerEvent::Welcome {
                        listener_name: None,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

/// Events of one broadcast a listener for `ids` receives.
///
/// Mutation events are renumbered over the listener's own documents so a
/// transaction touching foreign documents still completes on this stream.
fn visible_events(batch: Vec<ServerEvent>, ids: &HashSet<String>) -> Vec<ServerEvent> {
    let total = batch
        .iter()
        .filter(|event| matches!(event, ServerEvent::Mutation(m) if ids.contains(&m.document_id)))
        .count() as u32;

    let mut current = 0;
    batch
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Mutation(m) if !ids.contains(&m.document_id) => None,
            ServerEvent::Mutation(mut m) => {
                current += 1;
                m.transaction_total_events = Some(total);
                m.transaction_current_event = Some(current);
                Some(ServerEvent::Mutation(m))
            }
            other => Some(other),
        })
        .collect()
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, query: &ListenQuery) -> Result<EventStream> {
        let number = self.listen_count.fetch_add(1, Ordering::SeqCst) + 1;
        let ids: HashSet<String> = query.document_ids().map(str::to_string).collect();
        debug!(listener = number, filter = %query.filter, "Opening listener");

        let mut queue = VecDeque::new();
        queue.push_back(ServerEvent::Welcome {
            listener_name: Some(format!("memory-{number}")),
        });

        Ok(frames(ListenState {
            rx: self.events.subscribe(),
            ids,
            queue,
        }))
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<Option<Document>>> {
        let mut gate = self.fetch_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| TransportError::Closed)?;

        Ok(ids.iter().map(|id| self.document(id)).collect())
    }

    async fn fetch_revision(&self, id: &str, rev: &str) -> Result<Option<Document>> {
        Ok(self.history.get(id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|doc| doc.rev() == Some(rev))
                .cloned()
        }))
    }

    async fn commit(&self, mutations: &[MutationOp], options: &CommitOptions) -> Result<CommitAck> {
        let mut gate = self.commit_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| TransportError::Closed)?;

        if let Some(error) = self.fail_next_commit.lock().take() {
            warn!(error = %error, "Rejecting commit by request");
            return Err(error);
        }

        self.apply(mutations, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_core::{IdPair, Patch};
    use pairsync_protocol::SseDecoder;

    async fn next_event(stream: &mut EventStream, decoder: &mut SseDecoder) -> ServerEvent {
        loop {
            if let Some(event) = decoder.decode().unwrap() {
                return event;
            }
            let chunk = stream.next().await.unwrap().unwrap();
            decoder.feed(&chunk).unwrap();
        }
    }

    #[tokio::test]
    async fn test_commit_and_fetch() {
        let transport = MemoryTransport::new();
        let ack = transport
            .commit(
                &[MutationOp::Create(Document::new("drafts.movie", "movie"))],
                &CommitOptions::default(),
            )
            .await
            .unwrap();

        let docs = transport
            .fetch_many(&["drafts.movie".to_string(), "movie".to_string()])
            .await
            .unwrap();
        assert_eq!(docs[0].as_ref().and_then(Document::rev), Some(ack.transaction_id.as_str()));
        assert!(docs[1].is_none());
        assert_eq!(transport.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_transaction_is_atomic() {
        let transport = MemoryTransport::new();
        transport.seed(Document::new("movie", "movie")).unwrap();

        let result = transport
            .commit(
                &[
                    MutationOp::delete("drafts.movie"),
                    MutationOp::Patch(Patch::new("movie").if_revision("stale").set("title", "x")),
                ],
                &CommitOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(TransportError::Rejected { status: 409, .. })));
        assert!(transport.document("movie").unwrap().get("title").is_none());
        assert_eq!(transport.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_streams_numbered_events() {
        let transport = MemoryTransport::new();
        let mut stream = transport
            .listen(&ListenQuery::for_pair(&IdPair::new("movie").unwrap()))
            .await
            .unwrap();
        let mut decoder = SseDecoder::new();

        assert!(matches!(
            next_event(&mut stream, &mut decoder).await,
            ServerEvent::Welcome { .. }
        ));

        transport
            .commit(
                &[
                    MutationOp::Create(Document::new("other", "movie")),
                    MutationOp::Create(Document::new("drafts.movie", "movie")),
                    MutationOp::Create(Document::new("movie", "movie")),
                ],
                &CommitOptions {
                    transaction_id: Some("tx1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for expected in [("drafts.movie", 1), ("movie", 2)] {
            match next_event(&mut stream, &mut decoder).await {
                ServerEvent::Mutation(m) => {
                    assert_eq!(m.document_id, expected.0);
                    assert_eq!(m.transaction_id, "tx1");
                    assert_eq!(m.transaction_current_event, Some(expected.1));
                    assert_eq!(m.transaction_total_events, Some(2));
                    assert_eq!(m.transition, Transition::Appear);
                }
                other => panic!("expected mutation, got {other:?}"),
            }
        }
        assert_eq!(transport.listen_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_revision_and_failure_injection() {
        let transport = MemoryTransport::new();
        let first = transport
            .commit(
                &[MutationOp::Create(Document::new("movie", "movie"))],
                &CommitOptions::default(),
            )
            .await
            .unwrap();
        transport
            .commit(
                &[MutationOp::Patch(Patch::new("movie").set("title", "Alien"))],
                &CommitOptions::default(),
            )
            .await
            .unwrap();

        let old = transport
            .fetch_revision("movie", &first.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert!(old.get("title").is_none());
        assert_eq!(transport.revisions("movie").len(), 2);

        transport.fail_next_commit(TransportError::Unavailable("maintenance".into()));
        let err = transport
            .commit(&[MutationOp::delete("movie")], &CommitOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.document("movie").is_some());
    }
}
