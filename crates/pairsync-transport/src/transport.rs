//! Server transport seam

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use pairsync_core::{Document, IdPair, MutationOp};
use pairsync_protocol::EffectFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw listener byte stream in the server-sent event format
pub type EventStream = BoxStream<'static, Result<Bytes>>;

/// Parameters of a listen subscription
#[derive(Debug, Clone, PartialEq)]
pub struct ListenQuery {
    pub filter: String,
    pub params: BTreeMap<String, String>,
    pub events: Vec<String>,
    pub include_result: bool,
    pub effect_format: EffectFormat,
}

impl ListenQuery {
    /// Subscription scoped to both ids of a pair
    pub fn for_pair(id_pair: &IdPair) -> Self {
        let mut params = BTreeMap::new();
        params.insert("publishedId".to_string(), id_pair.published_id.clone());
        params.insert("draftId".to_string(), id_pair.draft_id.clone());

        Self {
            filter: "*[_id == $publishedId || _id == $draftId]".to_string(),
            params,
            events: vec!["welcome".into(), "mutation".into(), "reconnect".into()],
            include_result: false,
            effect_format: EffectFormat::Mendoza,
        }
    }

    /// Document ids referenced by the query parameters
    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.params.values().map(String::as_str)
    }
}

/// When a committed transaction must be visible to queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitVisibility {
    Sync,
    #[default]
    Async,
    Deferred,
}

/// Options sent with a commit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitOptions {
    pub visibility: CommitVisibility,
    /// Transaction id to commit under; the server picks one when absent
    pub transaction_id: Option<String>,
    /// Request tag for server-side attribution
    pub tag: Option<String>,
}

/// Server acknowledgement of a committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CommitAck {
    pub transaction_id: String,
    pub document_ids: Vec<String>,
}

/// Primitives the sync core consumes from a content server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a listener; the stream starts with a `welcome` or `reconnect` frame
    async fn listen(&self, query: &ListenQuery) -> Result<EventStream>;

    /// Fetch documents by id, in request order; missing documents are `None`
    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<Option<Document>>>;

    /// Fetch a document as it was at the given revision
    async fn fetch_revision(&self, id: &str, rev: &str) -> Result<Option<Document>>;

    /// Atomically apply a batch of operations
    async fn commit(&self, mutations: &[MutationOp], options: &CommitOptions) -> Result<CommitAck>;
}
