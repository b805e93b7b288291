//! Take a document offline, keeping its content as a draft

use super::{Availability, DisabledReason, OperationArgs};
use crate::error::Result;
use pairsync_core::{Document, MutationOp};

pub(super) fn disabled(args: &OperationArgs) -> Availability {
    if args.live_edit {
        return Availability::Disabled(DisabledReason::LiveEditEnabled);
    }
    if args.snapshots.published.is_none() {
        return Availability::Disabled(DisabledReason::NotPublished);
    }
    Availability::Enabled
}

pub(super) async fn execute(args: &OperationArgs) -> Result<()> {
    let mut ops = Vec::with_capacity(2);
    if let Some(published) = &args.snapshots.published {
        let mut draft = published.without(&[Document::UPDATED_AT, Document::REV]);
        draft.set_id(args.id_pair.draft_id.clone());
        ops.push(MutationOp::CreateIfNotExists(draft));
    }
    ops.push(MutationOp::delete(args.id_pair.published_id.clone()));

    args.submit(ops, "unpublish").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, settle};
    use super::super::{OperationArgs, OperationCall};
    use pairsync_core::Document;
    use pairsync_transport::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unpublish_moves_content_to_draft() {
        let transport = Arc::new(MemoryTransport::new());
        let mut published = Document::new("movie", "movie");
        published.insert("title", json!("Alien"));
        transport.seed(published).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;

        let args = OperationArgs::new(&pair, &context);
        OperationCall::Unpublish.execute(&args).await.unwrap();

        assert!(transport.document("movie").is_none());
        let draft = transport.document("drafts.movie").unwrap();
        assert_eq!(draft.get("title"), Some(&json!("Alien")));
        assert_eq!(transport.commit_count(), 1);
        settle(&pair, |s| s.published.document.is_none() && s.draft.document.is_some()).await;
    }

    #[tokio::test]
    async fn test_existing_draft_is_kept() {
        let transport = Arc::new(MemoryTransport::new());
        transport.seed(Document::new("movie", "movie")).unwrap();
        let mut draft = Document::new("drafts.movie", "movie");
        draft.insert("title", json!("Edited"));
        transport.seed(draft).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;

        let args = OperationArgs::new(&pair, &context);
        OperationCall::Unpublish.execute(&args).await.unwrap();

        assert_eq!(
            transport.document("drafts.movie").unwrap().get("title"),
            Some(&json!("Edited"))
        );
    }
}
