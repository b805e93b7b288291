//! Copy a document under a new id

use super::{Availability, DisabledReason, OperationArgs};
use crate::error::Result;
use pairsync_core::{to_draft_id, to_published_id, Document, MutationOp};

/// System fields a copy does not inherit
const SYSTEM_FIELDS: [&str; 4] = [Document::ID, Document::REV, Document::CREATED_AT, Document::UPDATED_AT];

pub(super) fn disabled(args: &OperationArgs) -> Availability {
    if args.snapshots.draft.is_none() && args.snapshots.published.is_none() {
        return Availability::Disabled(DisabledReason::NothingToDuplicate);
    }
    Availability::Enabled
}

pub(super) async fn execute(args: &OperationArgs, dupe_id: &str) -> Result<()> {
    let Some(source) = args.snapshots.draft.as_ref().or(args.snapshots.published.as_ref()) else {
        return Err(super::OperationName::Duplicate.disabled_error(DisabledReason::NothingToDuplicate));
    };

    let mut copy = source.without(&SYSTEM_FIELDS);
    copy.set_id(if args.live_edit {
        to_published_id(dupe_id)
    } else {
        to_draft_id(dupe_id)
    });
    args.submit(vec![MutationOp::Create(copy)], "duplicate").await?;
    Ok(())
}
