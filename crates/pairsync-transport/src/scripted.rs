//! Transport replaying a fixed listener script

use crate::error::{Result, TransportError};
use crate::transport::{CommitAck, CommitOptions, EventStream, ListenQuery, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use pairsync_core::{Document, MutationOp};
use pairsync_protocol::{encode_event, ServerEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// Emits the scripted events on every `listen`, then stays open
pub struct ScriptedTransport {
    script: Vec<ServerEvent>,
    /// Documents returned by every fetch, in request order
    snapshots: Vec<Option<Document>>,
    listen_count: AtomicUsize,
    fetch_gate: watch::Sender<bool>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ServerEvent>, snapshots: Vec<Option<Document>>) -> Self {
        let (fetch_gate, _) = watch::channel(true);
        Self {
            script,
            snapshots,
            listen_count: AtomicUsize::new(0),
            fetch_gate,
        }
    }

    pub fn listen_count(&self) -> usize {
        self.listen_count.load(Ordering::SeqCst)
    }

    pub fn hold_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn listen(&self, _query: &ListenQuery) -> Result<EventStream> {
        self.listen_count.fetch_add(1, Ordering::SeqCst);
        let frames: Vec<Result<Bytes>> = self
            .script
            .iter()
            .map(|event| {
                encode_event(event)
                    .map(Bytes::from)
                    .map_err(TransportError::from)
            })
            .collect();

        Ok(futures_util::stream::iter(frames)
            .chain(futures_util::stream::pending())
            .boxed())
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<Option<Document>>> {
        let mut gate = self.fetch_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(self.snapshots.iter().take(ids.len()).cloned().collect())
    }

    async fn fetch_revision(&self, _id: &str, _rev: &str) -> Result<Option<Document>> {
        Ok(None)
    }

    async fn commit(&self, mutations: &[MutationOp], options: &CommitOptions) -> Result<CommitAck> {
        Ok(CommitAck {
            transaction_id: options.transaction_id.clone().unwrap_or_default(),
            document_ids: mutations
                .iter()
                .filter_map(|op| op.target_id().map(str::to_string))
                .collect(),
        })
    }
}
