//! Mutation operations and their application to documents

use crate::document::Document;
use crate::error::{Error, Result};
use crate::path::{self, PathSegment};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

/// One document-level operation, serialized as `{"<kind>": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationOp {
    /// Create the document; keeps an existing one untouched locally
    Create(Document),
    CreateIfNotExists(Document),
    CreateOrReplace(Document),
    Delete { id: String },
    Patch(Patch),
}

impl MutationOp {
    pub fn delete(id: impl Into<String>) -> Self {
        MutationOp::Delete { id: id.into() }
    }

    /// Id of the document this operation targets
    pub fn target_id(&self) -> Option<&str> {
        match self {
            MutationOp::Create(doc)
            | MutationOp::CreateIfNotExists(doc)
            | MutationOp::CreateOrReplace(doc) => doc.id(),
            MutationOp::Delete { id } => Some(id),
            MutationOp::Patch(patch) => Some(&patch.id),
        }
    }

    /// Optimistically apply this operation to the current document state
    pub fn apply(&self, doc: Option<Document>) -> Option<Document> {
        match self {
            MutationOp::Create(new) | MutationOp::CreateIfNotExists(new) => {
                doc.or_else(|| Some(new.clone()))
            }
            MutationOp::CreateOrReplace(new) => Some(new.clone()),
            MutationOp::Delete { .. } => None,
            MutationOp::Patch(patch) => doc.map(|d| patch.apply(d)),
        }
    }

    /// Strict precondition check performed by the server before applying
    pub fn check(&self, current: Option<&Document>) -> Result<()> {
        match (self, current) {
            (MutationOp::Create(new), Some(_)) => Err(Error::DocumentExists(
                new.id().unwrap_or_default().to_string(),
            )),
            (MutationOp::Create(new), None) if new.id().is_none() => Err(Error::MissingId),
            (MutationOp::Patch(patch), current) => match &patch.if_revision_id {
                Some(expected) => {
                    let found = current.and_then(Document::rev).unwrap_or_default();
                    if found == expected {
                        Ok(())
                    } else {
                        Err(Error::RevisionMismatch {
                            id: patch.id.clone(),
                            expected: expected.clone(),
                            found: found.to_string(),
                        })
                    }
                }
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Position of an insert relative to the addressed array item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
    Replace,
}

/// Insert items into an array relative to the item at `path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawInsert", try_from = "RawInsert")]
pub struct InsertPatch {
    pub position: InsertPosition,
    pub path: String,
    pub items: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct RawInsert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replace: Option<String>,
    items: Vec<Value>,
}

impl From<InsertPatch> for RawInsert {
    fn from(insert: InsertPatch) -> Self {
        let mut raw = RawInsert {
            before: None,
            after: None,
            replace: None,
            items: insert.items,
        };
        match insert.position {
            InsertPosition::Before => raw.before = Some(insert.path),
            InsertPosition::After => raw.after = Some(insert.path),
            InsertPosition::Replace => raw.replace = Some(insert.path),
        }
        raw
    }
}

impl TryFrom<RawInsert> for InsertPatch {
    type Error = Error;

    fn try_from(raw: RawInsert) -> Result<Self> {
        let (position, path) = match (raw.before, raw.after, raw.replace) {
            (Some(p), None, None) => (InsertPosition::Before, p),
            (None, Some(p), None) => (InsertPosition::After, p),
            (None, None, Some(p)) => (InsertPosition::Replace, p),
            _ => {
                return Err(Error::InvalidPath(
                    "insert needs exactly one of before, after, replace".into(),
                ))
            }
        };
        Ok(Self {
            position,
            path,
            items: raw.items,
        })
    }
}

/// A set of field-level changes to one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub id: String,
    #[serde(rename = "ifRevisionID", default, skip_serializing_if = "Option::is_none")]
    pub if_revision_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set_if_missing: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inc: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub dec: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<InsertPatch>,
}

impl Patch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn if_revision(mut self, rev: impl Into<String>) -> Self {
        self.if_revision_id = Some(rev.into());
        self
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(path.into(), value.into());
        self
    }

    pub fn set_if_missing(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_if_missing.insert(path.into(), value.into());
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn inc(mut self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.inc.insert(path.into(), by.into());
        self
    }

    pub fn dec(mut self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.dec.insert(path.into(), by.into());
        self
    }

    pub fn insert(mut self, position: InsertPosition, path: impl Into<String>, items: Vec<Value>) -> Self {
        self.insert = Some(InsertPatch {
            position,
            path: path.into(),
            items,
        });
        self
    }

    /// Retarget this patch at another document id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Apply all operations in order: setIfMissing, set, unset, inc, dec, insert.
    /// Paths that cannot be resolved are skipped.
    pub fn apply(&self, doc: Document) -> Document {
        doc.with_value(|root| {
            for (path, value) in &self.set_if_missing {
                with_segments(path, |segments| {
                    if path::get_path(root, segments).map_or(true, Value::is_null) {
                        path::set_path(root, segments, value.clone());
                    }
                });
            }
            for (path, value) in &self.set {
                with_segments(path, |segments| {
                    path::set_path(root, segments, value.clone());
                });
            }
            for path in &self.unset {
                with_segments(path, |segments| {
                    path::unset_path(root, segments);
                });
            }
            for (path, by) in &self.inc {
                with_segments(path, |segments| add_at(root, segments, by, false));
            }
            for (path, by) in &self.dec {
                with_segments(path, |segments| add_at(root, segments, by, true));
            }
            if let Some(insert) = &self.insert {
                with_segments(&insert.path, |segments| apply_insert(root, segments, insert));
            }
        })
    }
}

/// Parse a path and hand its segments to `f`; the root itself is never addressable
fn with_segments(path: &str, f: impl FnOnce(&[PathSegment<'_>])) {
    match PathSegment::parse(path) {
        Ok(segments) if !segments.is_empty() => f(&segments),
        Ok(_) => debug!(path, "Skipping patch on document root"),
        Err(e) => debug!(path, error = %e, "Skipping patch with invalid path"),
    }
}

fn add_at(root: &mut Value, segments: &[PathSegment<'_>], by: &Value, negate: bool) {
    let Some(current) = path::get_path(root, segments) else {
        return;
    };

    let sum = match (current.as_i64(), by.as_i64()) {
        (Some(a), Some(b)) => {
            let b = if negate { -b } else { b };
            Value::Number(Number::from(a.saturating_add(b)))
        }
        _ => match (current.as_f64(), by.as_f64()) {
            (Some(a), Some(b)) => {
                let b = if negate { -b } else { b };
                match Number::from_f64(a + b) {
                    Some(n) => Value::Number(n),
                    None => return,
                }
            }
            _ => return,
        },
    };

    path::set_path(root, segments, sum);
}

fn apply_insert(root: &mut Value, segments: &[PathSegment<'_>], insert: &InsertPatch) {
    let Some((arr, last)) = path::parent_array_mut(root, segments) else {
        return;
    };

    let items = insert.items.iter().cloned();
    if arr.is_empty() && insert.position != InsertPosition::Replace {
        arr.extend(items);
        return;
    }

    let Some(idx) = path::resolve_index(arr, last) else {
        return;
    };

    match insert.position {
        InsertPosition::Before => {
            arr.splice(idx..idx, items);
        }
        InsertPosition::After => {
            arr.splice(idx + 1..idx + 1, items);
        }
        InsertPosition::Replace => {
            arr.splice(idx..idx + 1, items);
        }
    }
}

/// Current time in the RFC 3339 form used for `_createdAt`/`_updatedAt`
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Generate a fresh transaction id
pub fn new_transaction_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A group of operations submitted or observed under one transaction id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub transaction_id: String,
    pub mutations: Vec<MutationOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Mutation {
    /// A locally staged mutation with a fresh transaction id
    pub fn local(mutations: Vec<MutationOp>) -> Self {
        Self {
            transaction_id: new_transaction_id(),
            mutations,
            previous_rev: None,
            result_rev: None,
            timestamp: None,
        }
    }

    /// Apply the operations addressed to `id`, stamping revision and timestamp
    pub fn apply_to(&self, id: &str, doc: Option<Document>) -> Option<Document> {
        let result = self
            .mutations
            .iter()
            .filter(|op| op.target_id() == Some(id))
            .fold(doc, |doc, op| op.apply(doc));

        result.map(|mut doc| {
            if let Some(rev) = &self.result_rev {
                doc.set_rev(rev.clone());
            }
            if let Some(ts) = &self.timestamp {
                doc.insert(Document::UPDATED_AT, Value::String(ts.clone()));
            }
            doc
        })
    }

    /// Fold a sequence of mutations onto a base document
    pub fn apply_all<'a>(
        id: &str,
        base: Option<Document>,
        mutations: impl IntoIterator<Item = &'a Mutation>,
    ) -> Option<Document> {
        mutations
            .into_iter()
            .fold(base, |doc, mutation| mutation.apply_to(id, doc))
    }

    /// Flatten the operations of several mutations, preserving order
    pub fn flatten<'a>(mutations: impl IntoIterator<Item = &'a Mutation>) -> Vec<MutationOp> {
        mutations
            .into_iter()
            .flat_map(|m| m.mutations.iter().cloned())
            .collect()
    }
}
