//! Apply patches locally, creating the edited version on first use

use super::OperationArgs;
use crate::error::Result;
use pairsync_core::{Document, Patch};
use serde_json::Value;

pub(super) async fn execute(args: &OperationArgs, patches: Vec<Patch>, initial: Option<Document>) -> Result<()> {
    let target = args.target();
    let mut ops = Vec::with_capacity(patches.len() + 2);

    if !args.live_edit {
        if let Some(published) = &args.snapshots.published {
            ops.push(target.create_if_not_exists(published.without(&[Document::UPDATED_AT])));
        }
    }

    let mut seed = initial.unwrap_or_else(|| Document::new(target.id(), args.type_name.as_str()));
    seed.insert(Document::TYPE, Value::String(args.type_name.clone()));
    ops.push(target.create_if_not_exists(seed));
    ops.extend(target.patch(patches));

    target.mutate(ops).await
}
