//! Delete both versions of a document

use super::{Availability, DisabledReason, OperationArgs};
use crate::error::Result;
use pairsync_core::MutationOp;
use tracing::info;

pub(super) fn disabled(args: &OperationArgs) -> Availability {
    if args.snapshots.draft.is_none() && args.snapshots.published.is_none() {
        return Availability::Disabled(DisabledReason::NothingToDelete);
    }
    Availability::Enabled
}

pub(super) async fn execute(args: &OperationArgs) -> Result<()> {
    let ops = vec![
        MutationOp::delete(args.id_pair.draft_id.clone()),
        MutationOp::delete(args.id_pair.published_id.clone()),
    ];
    let ack = args.submit(ops, "delete").await?;
    info!(id = %args.id_pair, transaction_id = %ack.transaction_id, "Deleted document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, settle};
    use super::super::{OperationArgs, OperationCall};
    use pairsync_core::Document;
    use pairsync_transport::MemoryTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deletes_both_ids_in_one_transaction() {
        let transport = Arc::new(MemoryTransport::new());
        transport.seed(Document::new("movie", "movie")).unwrap();
        transport.seed(Document::new("drafts.movie", "movie")).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;

        let args = OperationArgs::new(&pair, &context);
        assert!(super::disabled(&args).is_enabled());
        OperationCall::Delete.execute(&args).await.unwrap();

        assert_eq!(transport.commit_count(), 1);
        assert!(transport.document("movie").is_none());
        assert!(transport.document("drafts.movie").is_none());
        settle(&pair, |s| s.draft.document.is_none() && s.published.document.is_none()).await;
    }
}
