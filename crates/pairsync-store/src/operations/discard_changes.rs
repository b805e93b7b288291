//! Drop the draft, keeping the published version

use super::{Availability, DisabledReason, OperationArgs};
use crate::error::Result;
use pairsync_core::MutationOp;

pub(super) fn disabled(args: &OperationArgs) -> Availability {
    if args.snapshots.draft.is_none() {
        return Availability::Disabled(DisabledReason::NoChanges);
    }
    if args.snapshots.published.is_none() {
        return Availability::Disabled(DisabledReason::NotPublished);
    }
    if args.live_edit {
        return Availability::Disabled(DisabledReason::LiveEditEnabled);
    }
    Availability::Enabled
}

pub(super) async fn execute(args: &OperationArgs) -> Result<()> {
    args.submit(
        vec![MutationOp::delete(args.id_pair.draft_id.clone())],
        "discardChanges",
    )
    .await?;
    Ok(())
}
