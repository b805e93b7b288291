//! Path addressing inside JSON documents
//!
//! Paths look like `title`, `author.name`, `tags[0]`, `tags[-1]` or
//! `body[_key=="a1b2"].text`.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Path segment for navigating document structure
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment<'a> {
    Key(&'a str),
    /// Array index; negative values count from the end
    Index(i64),
    /// Array item whose `_key` equals the given value
    Keyed(&'a str),
}

impl<'a> PathSegment<'a> {
    /// Parse a path string into segments
    pub fn parse(path: &'a str) -> Result<Vec<PathSegment<'a>>> {
        let mut segments = Vec::new();
        let mut rest = path;

        while !rest.is_empty() {
            rest = rest.strip_prefix('.').unwrap_or(rest);

            if let Some(inner) = rest.strip_prefix('[') {
                let end = inner
                    .find(']')
                    .ok_or_else(|| Error::InvalidPath(format!("unclosed bracket in {path}")))?;
                segments.push(Self::parse_bracket(&inner[..end], path)?);
                rest = &inner[end + 1..];
                continue;
            }

            let end = rest
                .find(|c| c == '.' || c == '[')
                .unwrap_or(rest.len());
            let key = &rest[..end];
            if key.is_empty() {
                return Err(Error::InvalidPath(format!("empty segment in {path}")));
            }
            segments.push(PathSegment::Key(key));
            rest = &rest[end..];
        }

        Ok(segments)
    }

    fn parse_bracket(inner: &'a str, path: &str) -> Result<PathSegment<'a>> {
        if let Some(value) = inner.trim().strip_prefix("_key") {
            let value = value.trim_start().strip_prefix("==").map(str::trim).ok_or_else(|| {
                Error::InvalidPath(format!("expected == in keyed segment of {path}"))
            })?;
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .ok_or_else(|| Error::InvalidPath(format!("unquoted key in {path}")))?;
            return Ok(PathSegment::Keyed(unquoted));
        }

        inner
            .trim()
            .parse::<i64>()
            .map(PathSegment::Index)
            .map_err(|_| Error::InvalidPath(format!("invalid index [{inner}] in {path}")))
    }
}

/// Resolve an index segment against an array, supporting negative indices
pub(crate) fn resolve_index(arr: &[Value], segment: &PathSegment<'_>) -> Option<usize> {
    match segment {
        PathSegment::Index(idx) if *idx >= 0 => {
            let idx = *idx as usize;
            (idx < arr.len()).then_some(idx)
        }
        PathSegment::Index(idx) => {
            let from_end = idx.unsigned_abs() as usize;
            arr.len().checked_sub(from_end)
        }
        PathSegment::Keyed(key) => arr
            .iter()
            .position(|item| item.get("_key").and_then(Value::as_str) == Some(*key)),
        PathSegment::Key(_) => None,
    }
}

/// Get a value at a path
pub fn get_path<'v>(root: &'v Value, segments: &[PathSegment<'_>]) -> Option<&'v Value> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(*key)?,
            _ => {
                let arr = current.as_array()?;
                &arr[resolve_index(arr, segment)?]
            }
        };
    }
    Some(current)
}

/// Mutable lookup; object keys are created along the way when `create` is set
fn get_path_mut<'v>(
    root: &'v mut Value,
    segments: &[PathSegment<'_>],
    create: bool,
) -> Option<&'v mut Value> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => {
                if create && !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let map = current.as_object_mut()?;
                if create {
                    map.entry(key.to_string()).or_insert(Value::Null)
                } else {
                    map.get_mut(*key)?
                }
            }
            _ => {
                let arr = current.as_array_mut()?;
                let idx = resolve_index(arr, segment)?;
                &mut arr[idx]
            }
        };
    }
    Some(current)
}

/// Set a value at a path, creating intermediate objects as needed.
/// Returns false when an array segment could not be resolved.
pub fn set_path(root: &mut Value, segments: &[PathSegment<'_>], value: Value) -> bool {
    match get_path_mut(root, segments, true) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// Remove the value at a path. Returns true if something was removed.
pub fn unset_path(root: &mut Value, segments: &[PathSegment<'_>]) -> bool {
    let Some((last, parent_path)) = segments.split_last() else {
        return false;
    };

    let Some(parent) = get_path_mut(root, parent_path, false) else {
        return false;
    };

    match (last, parent) {
        (PathSegment::Key(key), Value::Object(map)) => map.remove(*key).is_some(),
        (segment, Value::Array(arr)) => match resolve_index(arr, segment) {
            Some(idx) => {
                arr.remove(idx);
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Mutable access to the array that owns the last segment, plus that segment
pub(crate) fn parent_array_mut<'v, 's>(
    root: &'v mut Value,
    segments: &'s [PathSegment<'s>],
) -> Option<(&'v mut Vec<Value>, &'s PathSegment<'s>)> {
    let (last, parent_path) = segments.split_last()?;
    let arr = get_path_mut(root, parent_path, false)?.as_array_mut()?;
    Some((arr, last))
}
