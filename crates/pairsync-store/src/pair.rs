//! Document pair
//!
//! One actor task per pair owns the draft and published buffered documents
//! and the single listener subscription feeding both. Handles talk to it over
//! a command channel and observe it through broadcast and watch channels.

use crate::buffered::{BufferedDocument, BufferedEvent, CommitOutcome};
use crate::config::StoreConfig;
use crate::consistency::{ConsistencyStatus, ConsistencyTracker};
use crate::error::{Result, StoreError};
use pairsync_core::{Document, DocumentVariant, IdPair, Mutation, MutationOp, Patch};
use pairsync_protocol::ListenerEvent;
use pairsync_transport::{CommitOptions, ListenerChannel, Transport, TransportError};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What happened to one version of a pair
#[derive(Debug, Clone, PartialEq)]
pub enum VersionEvent {
    Document(BufferedEvent),
    /// The listener connection dropped; a fresh snapshot follows
    Reconnect,
    /// The listener failed for good; the pair no longer receives updates
    Terminated(StoreError),
}

/// A version event tagged with the version it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub version: DocumentVariant,
    pub event: VersionEvent,
}

/// Local state of one version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionState {
    pub document: Option<Document>,
    pub ready: bool,
}

/// Local state of both versions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairState {
    pub draft: VersionState,
    pub published: VersionState,
    pub terminated: bool,
}

impl PairState {
    /// Both snapshots have arrived
    pub fn is_ready(&self) -> bool {
        self.draft.ready && self.published.ready
    }

    pub fn version(&self, variant: DocumentVariant) -> &VersionState {
        match variant {
            DocumentVariant::Draft => &self.draft,
            DocumentVariant::Published => &self.published,
        }
    }

    fn version_mut(&mut self, variant: DocumentVariant) -> &mut VersionState {
        match variant {
            DocumentVariant::Draft => &mut self.draft,
            DocumentVariant::Published => &mut self.published,
        }
    }
}

type Reply = oneshot::Sender<Result<()>>;

enum PairCommand {
    Mutate {
        variant: DocumentVariant,
        ops: Vec<MutationOp>,
        reply: Reply,
    },
    Commit {
        variant: DocumentVariant,
        reply: Reply,
    },
    Settled {
        variant: DocumentVariant,
        transaction_id: String,
        result: std::result::Result<(), TransportError>,
    },
}

/// A batch of local edits handed to the server.
///
/// Exactly one of `success` or `failure` reaches the owning document; a
/// request dropped unresolved counts as failed.
pub struct CommitRequest {
    pub variant: DocumentVariant,
    pub mutation: Mutation,
    settle: Option<mpsc::UnboundedSender<PairCommand>>,
}

impl CommitRequest {
    pub fn success(mut self) {
        self.settle(Ok(()));
    }

    pub fn failure(mut self, error: TransportError) {
        self.settle(Err(error));
    }

    fn settle(&mut self, result: std::result::Result<(), TransportError>) {
        if let Some(tx) = self.settle.take() {
            let _ = tx.send(PairCommand::Settled {
                variant: self.variant,
                transaction_id: self.mutation.transaction_id.clone(),
                result,
            });
        }
    }
}

impl Drop for CommitRequest {
    fn drop(&mut self) {
        self.settle(Err(TransportError::Closed));
    }
}

/// Handle to one version of a checked-out pair
#[derive(Clone)]
pub struct DocumentVersion {
    variant: DocumentVariant,
    id: String,
    commands: mpsc::UnboundedSender<PairCommand>,
    events: broadcast::Sender<TaggedEvent>,
    state: watch::Receiver<PairState>,
}

impl DocumentVersion {
    pub fn variant(&self) -> DocumentVariant {
        self.variant
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to this version's events
    pub fn events(&self) -> broadcast::Receiver<TaggedEvent> {
        self.events.subscribe()
    }

    /// Current local document
    pub fn document(&self) -> Option<Document> {
        self.state.borrow().version(self.variant).document.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().version(self.variant).ready
    }

    /// Patch operations targeting this version
    pub fn patch(&self, patches: impl IntoIterator<Item = Patch>) -> Vec<MutationOp> {
        patches
            .into_iter()
            .map(|patch| MutationOp::Patch(patch.with_id(self.id.clone())))
            .collect()
    }

    pub fn create(&self, document: Document) -> MutationOp {
        MutationOp::Create(self.retarget(document))
    }

    pub fn create_if_not_exists(&self, document: Document) -> MutationOp {
        MutationOp::CreateIfNotExists(self.retarget(document))
    }

    pub fn create_or_replace(&self, document: Document) -> MutationOp {
        MutationOp::CreateOrReplace(self.retarget(document))
    }

    pub fn delete(&self) -> MutationOp {
        MutationOp::delete(self.id.clone())
    }

    /// Apply operations to the local state; they are sent on the next commit
    pub async fn mutate(&self, ops: Vec<MutationOp>) -> Result<()> {
        if let Some(stray) = ops.iter().find(|op| op.target_id() != Some(self.id.as_str())) {
            return Err(StoreError::WrongDocument {
                expected: self.id.clone(),
                found: stray.target_id().unwrap_or_default().to_string(),
            });
        }
        self.request(|reply| PairCommand::Mutate {
            variant: self.variant,
            ops,
            reply,
        })
        .await
    }

    /// Commit pending edits and wait until the server has accepted them
    pub async fn commit(&self) -> Result<()> {
        self.request(|reply| PairCommand::Commit {
            variant: self.variant,
            reply,
        })
        .await
    }

    fn retarget(&self, mut document: Document) -> Document {
        document.set_id(self.id.clone());
        document
    }

    async fn request(&self, command: impl FnOnce(Reply) -> PairCommand) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}

/// A draft/published pair fed by one listener subscription
pub struct DocumentPair {
    id_pair: IdPair,
    draft: DocumentVersion,
    published: DocumentVersion,
    state: watch::Receiver<PairState>,
    consistency: ConsistencyStatus,
    task: JoinHandle<()>,
}

impl DocumentPair {
    /// Start the pair actor; the server subscription is opened in the background
    pub(crate) fn open(transport: Arc<dyn Transport>, id_pair: IdPair, config: Arc<StoreConfig>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PairState::default());
        let tracker = ConsistencyTracker::new();
        let consistency = tracker.subscribe();
        let capacity = config.event_buffer.max(1);

        let slot = |variant: DocumentVariant| VersionSlot {
            variant,
            doc: BufferedDocument::new(id_pair.id_for(variant)),
            events: broadcast::channel(capacity).0,
            in_flight: Vec::new(),
            queued: Vec::new(),
        };
        let draft_slot = slot(DocumentVariant::Draft);
        let published_slot = slot(DocumentVariant::Published);

        let handle = |slot: &VersionSlot| DocumentVersion {
            variant: slot.variant,
            id: slot.doc.id().to_string(),
            commands: commands_tx.clone(),
            events: slot.events.clone(),
            state: state.clone(),
        };
        let draft = handle(&draft_slot);
        let published = handle(&published_slot);

        let actor = PairActor {
            id_pair: id_pair.clone(),
            transport,
            config,
            draft: draft_slot,
            published: published_slot,
            commands_tx,
            state: state_tx,
            consistency: tracker,
        };
        let task = tokio::spawn(actor.run(commands_rx));
        info!(id = %id_pair, "Document pair opened");

        Self {
            id_pair,
            draft,
            published,
            state,
            consistency,
            task,
        }
    }

    pub fn id_pair(&self) -> &IdPair {
        &self.id_pair
    }

    pub fn draft(&self) -> &DocumentVersion {
        &self.draft
    }

    pub fn published(&self) -> &DocumentVersion {
        &self.published
    }

    pub fn version(&self, variant: DocumentVariant) -> &DocumentVersion {
        match variant {
            DocumentVariant::Draft => &self.draft,
            DocumentVariant::Published => &self.published,
        }
    }

    /// Current local state of both versions
    pub fn state(&self) -> PairState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<PairState> {
        self.state.clone()
    }

    pub fn consistency(&self) -> ConsistencyStatus {
        self.consistency.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.borrow().terminated
    }

    /// Resolve once both snapshots have arrived
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        let state = state
            .wait_for(|s| s.is_ready() || s.terminated)
            .await
            .map_err(|_| StoreError::Closed)?;
        if state.terminated && !state.is_ready() {
            return Err(StoreError::PairTerminated(self.id_pair.to_string()));
        }
        Ok(())
    }

    /// Commit both versions
    pub async fn commit(&self) -> Result<()> {
        let (draft, published) = tokio::join!(self.draft.commit(), self.published.commit());
        draft.and(published)
    }
}

impl Drop for DocumentPair {
    fn drop(&mut self) {
        self.task.abort();
        info!(id = %self.id_pair, "Document pair disposed");
    }
}

struct VersionSlot {
    variant: DocumentVariant,
    doc: BufferedDocument,
    events: broadcast::Sender<TaggedEvent>,
    /// Waiting on the commit currently in flight
    in_flight: Vec<Reply>,
    /// Waiting on the commit that follows it
    queued: Vec<Reply>,
}

impl VersionSlot {
    fn emit(&self, event: VersionEvent) {
        let _ = self.events.send(TaggedEvent {
            version: self.variant,
            event,
        });
    }
}

struct PairActor {
    id_pair: IdPair,
    transport: Arc<dyn Transport>,
    config: Arc<StoreConfig>,
    draft: VersionSlot,
    published: VersionSlot,
    commands_tx: mpsc::UnboundedSender<PairCommand>,
    state: watch::Sender<PairState>,
    consistency: ConsistencyTracker,
}

fn resolve(waiters: impl IntoIterator<Item = Reply>, result: Result<()>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

async fn next_event(channel: &mut Option<ListenerChannel>) -> Option<pairsync_transport::Result<ListenerEvent>> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

impl PairActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PairCommand>) {
        let mut channel = match ListenerChannel::open(
            self.transport.clone(),
            self.id_pair.clone(),
            self.config.event_buffer,
        )
        .await
        {
            Ok(channel) => Some(channel),
            Err(e) => {
                self.terminate(e.into());
                None
            }
        };

        loop {
            tokio::select! {
                Some(command) = commands.recv() => self.on_command(command),
                event = next_event(&mut channel) => match event {
                    Some(Ok(event)) => self.on_listener_event(event),
                    Some(Err(e)) if !e.is_fatal() => {
                        warn!(id = %self.id_pair, error = %e, "Listener error");
                    }
                    Some(Err(e)) => {
                        channel = None;
                        self.terminate(e.into());
                    }
                    None => {
                        channel = None;
                        self.terminate(StoreError::Transport(TransportError::Closed));
                    }
                },
            }
        }
    }

    fn slot(&mut self, variant: DocumentVariant) -> &mut VersionSlot {
        match variant {
            DocumentVariant::Draft => &mut self.draft,
            DocumentVariant::Published => &mut self.published,
        }
    }

    fn on_command(&mut self, command: PairCommand) {
        match command {
            PairCommand::Mutate { variant, ops, reply } => {
                let events = self.slot(variant).doc.add_mutations(ops);
                self.publish(variant, events);
                let _ = reply.send(Ok(()));
            }
            PairCommand::Commit { variant, reply } => self.commit(variant, Some(reply)),
            PairCommand::Settled {
                variant,
                transaction_id,
                result,
            } => self.on_settled(variant, &transaction_id, result),
        }
    }

    fn commit(&mut self, variant: DocumentVariant, reply: Option<Reply>) {
        let slot = self.slot(variant);
        match slot.doc.commit() {
            CommitOutcome::Idle => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            CommitOutcome::AwaitInFlight => slot.in_flight.extend(reply),
            CommitOutcome::Queued => slot.queued.extend(reply),
            CommitOutcome::Submit(mutation) => {
                slot.in_flight.extend(reply);
                debug!(id = %self.id_pair, version = %variant, transaction_id = %mutation.transaction_id, "Submitting commit");
                let request = CommitRequest {
                    variant,
                    mutation,
                    settle: Some(self.commands_tx.clone()),
                };
                self.submit(request);
                self.sync(variant);
            }
        }
    }

    /// Hand a commit request to the transport
    fn submit(&self, request: CommitRequest) {
        let transport = self.transport.clone();
        let options = CommitOptions {
            visibility: self.config.commit_visibility,
            transaction_id: Some(request.mutation.transaction_id.clone()),
            tag: Some(self.config.tag_for("commit")),
        };
        tokio::spawn(async move {
            match transport.commit(&request.mutation.mutations, &options).await {
                Ok(_) => request.success(),
                Err(e) => request.failure(e),
            }
        });
    }

    fn on_settled(
        &mut self,
        variant: DocumentVariant,
        transaction_id: &str,
        result: std::result::Result<(), TransportError>,
    ) {
        let id_pair = self.id_pair.clone();
        let slot = self.slot(variant);
        let waiters = std::mem::take(&mut slot.in_flight);
        let queued = std::mem::take(&mut slot.queued);

        match result {
            Ok(()) => {
                let events = slot.doc.on_commit_success(transaction_id);
                let follow_up = slot.doc.take_queued();
                debug!(id = %id_pair, version = %variant, transaction_id, "Commit acknowledged");
                self.publish(variant, events);

                if follow_up {
                    self.slot(variant).in_flight.extend(queued);
                    self.commit(variant, None);
                    let slot = self.slot(variant);
                    if !slot.doc.commit_in_flight() {
                        resolve(std::mem::take(&mut slot.in_flight), Ok(()));
                    }
                } else {
                    resolve(queued, Ok(()));
                }
                resolve(waiters, Ok(()));
            }
            Err(e) => {
                let events = if e.is_rejection() {
                    slot.doc.on_commit_cancelled(transaction_id)
                } else {
                    slot.doc.on_commit_failure(transaction_id)
                };
                warn!(id = %id_pair, version = %variant, transaction_id, error = %e, "Commit failed");
                self.publish(variant, events);
                let error = StoreError::Transport(e);
                resolve(waiters.into_iter().chain(queued), Err(error));
            }
        }
    }

    fn on_listener_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Reconnect => {
                info!(id = %self.id_pair, "Listener reconnecting, awaiting fresh snapshots");
                self.draft.emit(VersionEvent::Reconnect);
                self.published.emit(VersionEvent::Reconnect);
            }
            ListenerEvent::Snapshot(snapshot) => {
                let Some(variant) = self.id_pair.variant_of(&snapshot.document_id) else {
                    return;
                };
                debug!(id = %self.id_pair, version = %variant, exists = snapshot.document.is_some(), "Snapshot");
                let events = self.slot(variant).doc.on_snapshot(snapshot.document);
                self.publish(variant, events);
            }
            ListenerEvent::Mutation(mutation) => {
                let Some(variant) = self.id_pair.variant_of(&mutation.document_id) else {
                    return;
                };
                let events = self
                    .slot(variant)
                    .doc
                    .on_remote_mutation(mutation.to_mutation());
                self.publish(variant, events);
            }
        }
    }

    /// Emit buffered-document events and refresh the shared state
    fn publish(&mut self, variant: DocumentVariant, events: Vec<BufferedEvent>) {
        let slot = self.slot(variant);
        for event in events {
            slot.emit(VersionEvent::Document(event));
        }
        self.sync(variant);
    }

    fn sync(&mut self, variant: DocumentVariant) {
        let slot = self.slot(variant);
        let next = VersionState {
            document: slot.doc.local().cloned(),
            ready: slot.doc.is_ready(),
        };
        let consistent = slot.doc.is_consistent();

        self.state.send_if_modified(|state| {
            let current = state.version_mut(variant);
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        self.consistency.update(variant, consistent);
    }

    fn terminate(&mut self, error: StoreError) {
        error!(id = %self.id_pair, error = %error, "Document pair terminated");
        self.draft.emit(VersionEvent::Terminated(error.clone()));
        self.published.emit(VersionEvent::Terminated(error));
        self.state.send_modify(|state| state.terminated = true);
    }
}
