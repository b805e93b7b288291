//! Commit pending edits of both versions

use super::OperationArgs;
use crate::error::Result;

pub(super) async fn execute(args: &OperationArgs) -> Result<()> {
    let (draft, published) = tokio::join!(args.draft.commit(), args.published.commit());
    draft.and(published)
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::super::{OperationArgs, OperationCall};
    use pairsync_core::Document;
    use pairsync_transport::MemoryTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_commit_flushes_both_versions() {
        let transport = Arc::new(MemoryTransport::new());
        let (pair, context) = fixture(&transport, "movie", false).await;

        let draft = pair.draft();
        draft
            .mutate(vec![draft.create(Document::new("", "movie"))])
            .await
            .unwrap();
        let published = pair.published();
        published
            .mutate(vec![published.create(Document::new("", "movie"))])
            .await
            .unwrap();
        assert!(!pair.consistency().is_consistent());

        let args = OperationArgs::new(&pair, &context);
        OperationCall::Commit.execute(&args).await.unwrap();

        assert!(pair.consistency().is_consistent());
        assert!(transport.document("drafts.movie").is_some());
        assert!(transport.document("movie").is_some());
    }
}
