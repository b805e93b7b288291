//! Publish the draft
//!
//! The published document is replaced by the draft and the draft deleted, in
//! one transaction. An existing published version is revision-locked so the
//! transaction fails if someone else changed it in the meantime.

use super::{Availability, DisabledReason, OperationArgs, OperationName};
use crate::error::Result;
use pairsync_core::{Document, MutationOp, Patch};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Field unset by the revision lock; it never exists, so the patch is a no-op
const REVISION_LOCK_FIELD: &str = "_revision_lock_pseudo_field_";
const STRENGTHEN_ON_PUBLISH: &str = "_strengthenOnPublish";
const WEAK: &str = "_weak";
const REF: &str = "_ref";

pub(super) fn disabled(args: &OperationArgs) -> Availability {
    if args.live_edit {
        return Availability::Disabled(DisabledReason::LiveEditEnabled);
    }
    match (&args.snapshots.draft, &args.snapshots.published) {
        (None, Some(_)) => Availability::Disabled(DisabledReason::AlreadyPublished),
        (None, None) => Availability::Disabled(DisabledReason::NoChanges),
        _ => Availability::Enabled,
    }
}

pub(super) async fn execute(args: &OperationArgs) -> Result<()> {
    let (draft_commit, published_commit) = tokio::join!(args.draft.commit(), args.published.commit());
    draft_commit.and(published_commit)?;

    let snapshots = args.current_snapshots();
    let Some(draft) = snapshots.draft else {
        return Err(OperationName::Publish.disabled_error(DisabledReason::NoChanges));
    };

    let mut fields: Vec<&str> = args.config.transient_fields.iter().map(String::as_str).collect();
    fields.push(Document::REV);
    let mut document = Document::from_value(strengthen_on_publish(draft.without(&fields).into_value()))?;
    document.set_id(args.id_pair.published_id.clone());

    let mut ops = Vec::with_capacity(3);
    match &snapshots.published {
        Some(published) => {
            let mut lock = Patch::new(args.id_pair.published_id.clone()).unset(REVISION_LOCK_FIELD);
            if let Some(rev) = published.rev() {
                lock = lock.if_revision(rev);
            }
            ops.push(MutationOp::Patch(lock));
            ops.push(MutationOp::CreateOrReplace(document));
        }
        None => ops.push(MutationOp::Create(document)),
    }
    ops.push(MutationOp::delete(args.id_pair.draft_id.clone()));

    debug!(id = %args.id_pair, ops = ops.len(), "Publishing");
    let ack = args.submit(ops, "publish").await?;
    info!(id = %args.id_pair, transaction_id = %ack.transaction_id, "Published document");
    Ok(())
}

/// Turn weak references flagged for strengthening into strong ones.
///
/// `{"_ref", "_weak": true, "_strengthenOnPublish": {..}}` loses both markers,
/// unless the flag itself asks for the reference to stay weak.
fn strengthen_on_publish(value: Value) -> Value {
    match value {
        Value::Object(map) if is_reference(&map) => {
            let mut map = map;
            if let Some(flag) = map.remove(STRENGTHEN_ON_PUBLISH) {
                map.remove(WEAK);
                if flag.get("weak").and_then(Value::as_bool) == Some(true) {
                    map.insert(WEAK.to_string(), Value::Bool(true));
                }
            }
            Value::Object(map)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, strengthen_on_publish(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strengthen_on_publish).collect()),
        other => other,
    }
}

fn is_reference(map: &Map<String, Value>) -> bool {
    map.get(REF).map_or(false, Value::is_string)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, settle};
    use super::super::{DisabledReason, OperationArgs, OperationCall};
    use super::*;
    use crate::error::StoreError;
    use pairsync_transport::{MemoryTransport, TransportError};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_strengthen_on_publish() {
        let value = json!({
            "director": {"_ref": "person-1", "_weak": true, "_strengthenOnPublish": {"type": "person"}},
            "cast": [
                {"_key": "a", "_ref": "person-2", "_weak": true, "_strengthenOnPublish": {"weak": true}},
                {"_key": "b", "_ref": "person-3", "_weak": true}
            ],
            "nested": {"inner": {"_ref": "studio", "_strengthenOnPublish": {}}}
        });

        assert_eq!(
            strengthen_on_publish(value),
            json!({
                "director": {"_ref": "person-1"},
                "cast": [
                    {"_key": "a", "_ref": "person-2", "_weak": true},
                    {"_key": "b", "_ref": "person-3", "_weak": true}
                ],
                "nested": {"inner": {"_ref": "studio"}}
            })
        );
    }

    #[tokio::test]
    async fn test_guards() {
        let transport = Arc::new(MemoryTransport::new());
        transport.seed(Document::new("movie", "movie")).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;

        let mut args = OperationArgs::new(&pair, &context);
        assert_eq!(disabled(&args).reason(), Some(DisabledReason::AlreadyPublished));

        args.snapshots.draft = Some(Document::new("drafts.movie", "movie"));
        assert!(disabled(&args).is_enabled());

        args.live_edit = true;
        assert_eq!(disabled(&args).reason(), Some(DisabledReason::LiveEditEnabled));
    }

    #[tokio::test]
    async fn test_first_publish_creates() {
        let transport = Arc::new(MemoryTransport::new());
        let mut draft = Document::new("drafts.movie", "movie");
        draft.insert("title", json!("Alien"));
        transport.seed(draft).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;

        let args = OperationArgs::new(&pair, &context);
        OperationCall::Publish.execute(&args).await.unwrap();

        let published = transport.document("movie").unwrap();
        assert_eq!(published.get("title"), Some(&json!("Alien")));
        assert_eq!(published.id(), Some("movie"));
        assert!(transport.document("drafts.movie").is_none());
        assert_eq!(transport.commit_count(), 1);
        settle(&pair, |s| s.draft.document.is_none() && s.published.document.is_some()).await;
    }

    #[tokio::test]
    async fn test_republish_is_revision_locked() {
        let transport = Arc::new(MemoryTransport::new());
        transport.seed(Document::new("movie", "movie")).unwrap();
        let mut draft = Document::new("drafts.movie", "movie");
        draft.insert("title", json!("Edited"));
        transport.seed(draft).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;
        let args = OperationArgs::new(&pair, &context);

        // Someone else changes the published version behind our back
        transport.seed(Document::new("movie", "movie")).unwrap();
        let err = OperationCall::Publish.execute(&args).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transport(TransportError::Rejected { status: 409, .. })
        ));
        assert!(transport.document("drafts.movie").is_some());
    }

    #[tokio::test]
    async fn test_publish_flushes_pending_edits() {
        let transport = Arc::new(MemoryTransport::new());
        transport.seed(Document::new("drafts.movie", "movie")).unwrap();
        let (pair, context) = fixture(&transport, "movie", false).await;

        let draft = pair.draft();
        draft
            .mutate(draft.patch([Patch::new("movie").set("title", "Fresh")]))
            .await
            .unwrap();

        let args = OperationArgs::new(&pair, &context);
        OperationCall::Publish.execute(&args).await.unwrap();
        assert_eq!(
            transport.document("movie").unwrap().get("title"),
            Some(&json!("Fresh"))
        );
    }
}
