//! Store configuration

use pairsync_transport::CommitVisibility;
use serde::{Deserialize, Serialize};

/// Settings shared by every pair a store opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of each version's event channel
    pub event_buffer: usize,
    /// Visibility requested for commits
    pub commit_visibility: CommitVisibility,
    /// Schema types edited without drafts
    pub live_edit_types: Vec<String>,
    /// Top-level fields dropped when publishing
    pub transient_fields: Vec<String>,
    /// Prefix of the request tag sent with commits
    pub tag: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            commit_visibility: CommitVisibility::Async,
            live_edit_types: Vec::new(),
            transient_fields: vec!["_updatedAt".to_string()],
            tag: "document".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_commit_visibility(mut self, visibility: CommitVisibility) -> Self {
        self.commit_visibility = visibility;
        self
    }

    pub fn with_live_edit_type(mut self, type_name: impl Into<String>) -> Self {
        self.live_edit_types.push(type_name.into());
        self
    }

    pub fn with_transient_fields(mut self, fields: Vec<String>) -> Self {
        self.transient_fields = fields;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Request tag for an action, e.g. `document.publish`
    pub fn tag_for(&self, action: &str) -> String {
        format!("{}.{}", self.tag, action)
    }
}
