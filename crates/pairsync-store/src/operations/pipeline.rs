//! Operation pipeline
//!
//! All invocations go through one command channel. Per pair, the latest
//! invocation wins: starting an operation aborts one still running for the
//! same pair, and an aborted operation reports nothing.

use super::{OperationArgs, OperationCall, OperationContext, OperationName};
use crate::error::{Result, StoreError};
use crate::store::PairLease;
use futures_util::FutureExt;
use pairsync_core::IdPair;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Success {
        operation: OperationName,
        id_pair: IdPair,
    },
    Error {
        operation: OperationName,
        id_pair: IdPair,
        error: StoreError,
    },
}

impl OperationResult {
    pub fn operation(&self) -> OperationName {
        match self {
            OperationResult::Success { operation, .. } | OperationResult::Error { operation, .. } => *operation,
        }
    }

    pub fn id_pair(&self) -> &IdPair {
        match self {
            OperationResult::Success { id_pair, .. } | OperationResult::Error { id_pair, .. } => id_pair,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }
}

struct Invocation {
    call: OperationCall,
    pair: PairLease,
    context: OperationContext,
}

/// Runs operations and broadcasts their results
pub struct OperationPipeline {
    commands: mpsc::UnboundedSender<Invocation>,
    results: broadcast::Sender<OperationResult>,
    task: JoinHandle<()>,
}

impl OperationPipeline {
    pub fn new(capacity: usize) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (results, _) = broadcast::channel(capacity.max(1));
        let task = tokio::spawn(dispatch(rx, results.clone()));
        Self {
            commands,
            results,
            task,
        }
    }

    /// Queue `call` for the pair behind `pair`
    pub(crate) fn dispatch(&self, call: OperationCall, pair: PairLease, context: OperationContext) -> Result<()> {
        self.commands
            .send(Invocation { call, pair, context })
            .map_err(|_| StoreError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationResult> {
        self.results.subscribe()
    }
}

impl Drop for OperationPipeline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn dispatch(mut commands: mpsc::UnboundedReceiver<Invocation>, results: broadcast::Sender<OperationResult>) {
    let mut running: HashMap<IdPair, JoinHandle<()>> = HashMap::new();

    while let Some(invocation) = commands.recv().await {
        running.retain(|_, task| !task.is_finished());

        let id_pair = invocation.pair.id_pair().clone();
        if let Some(previous) = running.remove(&id_pair) {
            debug!(id = %id_pair, operation = %invocation.call.name(), "Superseding running operation");
            previous.abort();
        }

        let task = tokio::spawn(run(invocation, results.clone()));
        running.insert(id_pair, task);
    }
}

async fn run(invocation: Invocation, results: broadcast::Sender<OperationResult>) {
    let operation = invocation.call.name();
    let id_pair = invocation.pair.id_pair().clone();
    debug!(id = %id_pair, operation = %operation, "Running operation");

    let outcome = AssertUnwindSafe(execute(invocation)).catch_unwind().await;
    let result = match outcome {
        Ok(Ok(())) => OperationResult::Success { operation, id_pair },
        Ok(Err(error)) => {
            warn!(id = %id_pair, operation = %operation, error = %error, "Operation failed");
            OperationResult::Error {
                operation,
                id_pair,
                error,
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(id = %id_pair, operation = %operation, panic = %message, "Operation panicked");
            OperationResult::Error {
                operation,
                id_pair,
                error: StoreError::TaskFailed(message),
            }
        }
    };
    let _ = results.send(result);
}

async fn execute(invocation: Invocation) -> Result<()> {
    let Invocation { call, pair, context } = invocation;

    if call.name().requires_consistency() {
        let mut consistency = pair.consistency();
        if !consistency.is_consistent() {
            debug!(id = %pair.id_pair(), operation = %call.name(), "Waiting for pending edits");
            pair.commit().await?;
            consistency.wait_consistent().await?;
        }
    }

    let args = OperationArgs::new(&pair, &context);
    call.execute(&args).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::pair::DocumentPair;
    use crate::registry::SharedCache;
    use pairsync_core::{Document, Patch};
    use pairsync_transport::MemoryTransport;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Fixture {
        transport: Arc<MemoryTransport>,
        pair: PairLease,
        context: OperationContext,
        pipeline: OperationPipeline,
        _cache: SharedCache<IdPair, DocumentPair>,
    }

    async fn fixture(transport: Arc<MemoryTransport>) -> Fixture {
        let config = Arc::new(StoreConfig::default());
        let cache = SharedCache::new();
        let id_pair = IdPair::new("movie").unwrap();
        let pair = cache
            .acquire(id_pair.clone(), || {
                Ok::<_, Infallible>(DocumentPair::open(transport.clone(), id_pair, config.clone()))
            })
            .unwrap();
        timeout(Duration::from_secs(5), pair.ready()).await.unwrap().unwrap();

        Fixture {
            context: OperationContext {
                type_name: "movie".into(),
                live_edit: false,
                transport: transport.clone(),
                config,
            },
            transport,
            pair,
            pipeline: OperationPipeline::new(16),
            _cache: cache,
        }
    }

    async fn next_result(rx: &mut broadcast::Receiver<OperationResult>) -> OperationResult {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no operation result")
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_and_error_results() {
        let f = fixture(Arc::new(MemoryTransport::new())).await;
        let mut results = f.pipeline.subscribe();

        f.pipeline
            .dispatch(OperationCall::Commit, f.pair.clone(), f.context.clone())
            .unwrap();
        assert_eq!(
            next_result(&mut results).await,
            OperationResult::Success {
                operation: OperationName::Commit,
                id_pair: f.pair.id_pair().clone()
            }
        );

        f.pipeline
            .dispatch(
                OperationCall::Restore {
                    revision: "missing".into(),
                },
                f.pair.clone(),
                f.context.clone(),
            )
            .unwrap();
        let result = next_result(&mut results).await;
        assert_eq!(result.operation(), OperationName::Restore);
        assert!(matches!(
            result,
            OperationResult::Error {
                error: StoreError::RevisionNotFound { .. },
                ..
            }
        ));

        // The pipeline keeps running after a failure
        f.pipeline
            .dispatch(OperationCall::Commit, f.pair.clone(), f.context.clone())
            .unwrap();
        assert!(next_result(&mut results).await.is_success());
    }

    #[tokio::test]
    async fn test_publish_waits_for_consistency() {
        let f = fixture(Arc::new(MemoryTransport::new())).await;
        let mut results = f.pipeline.subscribe();

        let draft = f.pair.draft();
        draft
            .mutate(vec![draft.create(Document::new("", "movie"))])
            .await
            .unwrap();
        draft
            .mutate(draft.patch([Patch::new("movie").set("title", "Alien")]))
            .await
            .unwrap();

        f.transport.hold_commits();
        f.pipeline
            .dispatch(OperationCall::Publish, f.pair.clone(), f.context.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!f.pair.consistency().is_consistent());
        assert!(f.transport.document("movie").is_none());
        assert!(results.try_recv().is_err());

        f.transport.release_commits();
        let result = next_result(&mut results).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(
            f.transport.document("movie").unwrap().get("title"),
            Some(&json!("Alien"))
        );
        assert!(f.transport.document("drafts.movie").is_none());
    }

    #[tokio::test]
    async fn test_latest_invocation_wins() {
        let f = fixture(Arc::new(MemoryTransport::new())).await;
        let mut results = f.pipeline.subscribe();

        let draft = f.pair.draft();
        draft
            .mutate(vec![draft.create(Document::new("", "movie"))])
            .await
            .unwrap();

        // Publish blocks waiting for the draft commit
        f.transport.hold_commits();
        f.pipeline
            .dispatch(OperationCall::Publish, f.pair.clone(), f.context.clone())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        f.pipeline
            .dispatch(
                OperationCall::Patch {
                    patches: vec![Patch::new("movie").set("title", "Later")],
                    initial: None,
                },
                f.pair.clone(),
                f.context.clone(),
            )
            .unwrap();

        let result = next_result(&mut results).await;
        assert_eq!(result.operation(), OperationName::Patch);
        assert!(result.is_success());

        f.transport.release_commits();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(results.try_recv().is_err());
        assert!(f.transport.document("movie").is_none());
    }
}
