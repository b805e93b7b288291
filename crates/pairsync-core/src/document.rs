//! Document type

use crate::error::{Error, Result};
use crate::path::{self, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless JSON document addressed by its `_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub const ID: &'static str = "_id";
    pub const TYPE: &'static str = "_type";
    pub const REV: &'static str = "_rev";
    pub const CREATED_AT: &'static str = "_createdAt";
    pub const UPDATED_AT: &'static str = "_updatedAt";

    /// Create an empty document with the given id and type
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(Self::ID.into(), Value::String(id.into()));
        map.insert(Self::TYPE.into(), Value::String(type_name.into()));
        Self(map)
    }

    /// Build a document from a JSON value; the value must be an object with an `_id`
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let doc = Self(map);
                if doc.id().is_none() {
                    return Err(Error::MissingId);
                }
                Ok(doc)
            }
            other => Err(Error::Serialization(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(Self::ID).and_then(Value::as_str)
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.get(Self::TYPE).and_then(Value::as_str)
    }

    pub fn rev(&self) -> Option<&str> {
        self.0.get(Self::REV).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(Self::ID.into(), Value::String(id.into()));
    }

    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.0.insert(Self::REV.into(), Value::String(rev.into()));
    }

    /// Top-level field access
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert a top-level field
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Remove a top-level field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Get a value at a nested path (e.g. `author.name`, `tags[0]`)
    pub fn get_path(&self, path: &str) -> Result<Option<Value>> {
        let segments = PathSegment::parse(path)?;
        let root = Value::Object(self.0.clone());
        Ok(path::get_path(&root, &segments).cloned())
    }

    /// Copy of this document without the given top-level fields
    pub fn without(&self, fields: &[&str]) -> Self {
        let mut map = self.0.clone();
        for field in fields {
            map.remove(*field);
        }
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Run `f` over the document viewed as a JSON value
    pub(crate) fn with_value(self, f: impl FnOnce(&mut Value)) -> Self {
        let mut value = Value::Object(self.0);
        f(&mut value);
        match value {
            Value::Object(map) => Self(map),
            // Patches only address nested paths, so the root stays an object
            _ => unreachable!("document root replaced by a non-object"),
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}
