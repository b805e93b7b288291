//! Bring back an earlier revision of a document

use super::OperationArgs;
use crate::error::{Result, StoreError};
use pairsync_core::{Document, MutationOp};
use tracing::info;

pub(super) async fn execute(args: &OperationArgs, revision: &str) -> Result<()> {
    let id_pair = &args.id_pair;
    let mut document = match args.transport.fetch_revision(&id_pair.published_id, revision).await? {
        Some(document) => document,
        None => args
            .transport
            .fetch_revision(&id_pair.draft_id, revision)
            .await?
            .ok_or_else(|| StoreError::RevisionNotFound {
                id: id_pair.published_id.clone(),
                rev: revision.to_string(),
            })?,
    };

    document.remove(Document::REV);
    document.set_id(args.target().id());
    args.submit(vec![MutationOp::CreateOrReplace(document)], "restore").await?;
    info!(id = %id_pair, revision, "Restored revision");
    Ok(())
}
