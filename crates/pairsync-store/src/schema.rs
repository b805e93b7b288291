//! Schema type lookup

use crate::config::StoreConfig;
use std::collections::HashMap;

/// What the store needs to know about a document type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaType {
    pub name: String,
    /// Edited in place, without a draft
    pub live_edit: bool,
    /// Top-level fields that must be present and non-null
    pub required: Vec<String>,
}

impl SchemaType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn live_edit(mut self, live_edit: bool) -> Self {
        self.live_edit = live_edit;
        self
    }

    pub fn required(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }
}

/// Registered document types; unknown types get default settings
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, SchemaType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema with the live-edit types named in the config
    pub fn from_config(config: &StoreConfig) -> Self {
        config
            .live_edit_types
            .iter()
            .fold(Self::new(), |schema, name| {
                schema.with_type(SchemaType::new(name).live_edit(true))
            })
    }

    /// Register a type, replacing any earlier definition
    pub fn with_type(mut self, schema_type: SchemaType) -> Self {
        self.types.insert(schema_type.name.clone(), schema_type);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&SchemaType> {
        self.types.get(type_name)
    }

    /// Definition for `type_name`, falling back to an unconstrained type
    pub fn resolve(&self, type_name: &str) -> SchemaType {
        self.get(type_name)
            .cloned()
            .unwrap_or_else(|| SchemaType::new(type_name))
    }

    pub fn is_live_edit(&self, type_name: &str) -> bool {
        self.get(type_name).map_or(false, |t| t.live_edit)
    }
}
