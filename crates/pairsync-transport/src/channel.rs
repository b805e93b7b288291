//! Listener channel for one draft/published pair
//!
//! Drives a [`PairListener`] over a transport: decodes the raw stream, runs
//! the snapshot fetches it requests and forwards the resulting events.

use crate::error::{Result, TransportError};
use crate::transport::{EventStream, ListenQuery, Transport};
use futures_util::StreamExt;
use pairsync_core::{Document, IdPair};
use pairsync_protocol::{ListenerAction, ListenerEvent, PairListener, SseDecoder};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type FetchResult = (u64, Result<Vec<Option<Document>>>);

/// Ordered listener events for one pair; the subscription ends when dropped
pub struct ListenerChannel {
    id_pair: IdPair,
    events: mpsc::Receiver<Result<ListenerEvent>>,
    task: JoinHandle<()>,
}

impl ListenerChannel {
    /// Open the server subscription and start processing it
    pub async fn open(
        transport: Arc<dyn Transport>,
        id_pair: IdPair,
        buffer: usize,
    ) -> Result<Self> {
        let query = ListenQuery::for_pair(&id_pair);
        let stream = transport.listen(&query).await?;
        debug!(id = %id_pair, "Listener subscription opened");

        let (tx, events) = mpsc::channel(buffer.max(1));
        let driver = Driver {
            transport,
            listener: PairListener::new(id_pair.clone()),
            decoder: SseDecoder::new(),
            tx,
        };
        let task = tokio::spawn(driver.run(stream));

        Ok(Self {
            id_pair,
            events,
            task,
        })
    }

    pub fn id_pair(&self) -> &IdPair {
        &self.id_pair
    }

    /// Next event; `None` once the channel has shut down
    pub async fn recv(&mut self) -> Option<Result<ListenerEvent>> {
        self.events.recv().await
    }
}

impl Drop for ListenerChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Driver {
    transport: Arc<dyn Transport>,
    listener: PairListener,
    decoder: SseDecoder,
    tx: mpsc::Sender<Result<ListenerEvent>>,
}

impl Driver {
    async fn run(mut self, mut stream: EventStream) {
        let (fetch_tx, mut fetch_rx) = mpsc::channel::<FetchResult>(4);
        let mut fetch_task: Option<JoinHandle<()>> = None;

        let outcome = loop {
            tokio::select! {
                chunk = stream.next() => {
                    let chunk = match chunk {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => break Err(e),
                        None => break Err(TransportError::Closed),
                    };
                    match self.process(&chunk).await {
                        Ok(fetches) => {
                            for generation in fetches {
                                if let Some(previous) = fetch_task.take() {
                                    previous.abort();
                                }
                                fetch_task = Some(self.spawn_fetch(generation, fetch_tx.clone()));
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }
                Some((generation, result)) = fetch_rx.recv() => {
                    let docs = match result {
                        Ok(docs) => docs,
                        Err(e) => break Err(e),
                    };
                    let mut docs = docs.into_iter();
                    let draft = docs.next().flatten();
                    let published = docs.next().flatten();
                    let mut closed = false;
                    for event in self.listener.on_snapshots(generation, draft, published) {
                        if self.tx.send(Ok(event)).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break Ok(());
                    }
                }
                _ = self.tx.closed() => break Ok(()),
            }
        };

        if let Some(task) = fetch_task {
            task.abort();
        }

        if let Err(e) = outcome {
            error!(id = %self.listener.id_pair(), error = %e, "Listener channel failed");
            let _ = self.tx.send(Err(e)).await;
        } else {
            debug!(id = %self.listener.id_pair(), "Listener channel closed");
        }
    }

    /// Decode a chunk and apply every complete event; returns requested fetches
    async fn process(&mut self, chunk: &[u8]) -> Result<Vec<u64>> {
        self.decoder.feed(chunk)?;
        let mut fetches = Vec::new();

        loop {
            let event = match self.decoder.decode() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(id = %self.listener.id_pair(), error = %e, "Skipping undecodable event");
                    continue;
                }
            };

            for action in self.listener.on_server_event(event)? {
                match action {
                    ListenerAction::Emit(event) => {
                        self.tx
                            .send(Ok(event))
                            .await
                            .map_err(|_| TransportError::Closed)?;
                    }
                    ListenerAction::FetchSnapshots { generation } => fetches.push(generation),
                }
            }
        }

        Ok(fetches)
    }

    fn spawn_fetch(&self, generation: u64, reply: mpsc::Sender<FetchResult>) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let id_pair = self.listener.id_pair().clone();
        tokio::spawn(async move {
            let ids = [id_pair.draft_id.clone(), id_pair.published_id.clone()];
            let result = transport.fetch_many(&ids).await;
            let _ = reply.send((generation, result)).await;
        })
    }
}
