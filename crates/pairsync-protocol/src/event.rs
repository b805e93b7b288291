//! Listener event types

use pairsync_core::{Document, IdPair, Mutation, MutationOp};
use serde::{Deserialize, Serialize};

/// How a mutation changed the visibility of its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Appear,
    #[default]
    Update,
    Disappear,
}

/// When the mutation became visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Query,
    Transaction,
}

/// Format of the `effects` patches in mutation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectFormat {
    #[default]
    Mendoza,
}

/// Before/after effect patches, opaque to this layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effects {
    pub apply: serde_json::Value,
    pub revert: serde_json::Value,
}

/// Position of an event within a multi-document transaction (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventNumber {
    pub current: u32,
    pub total: u32,
}

impl EventNumber {
    pub const SINGLE: EventNumber = EventNumber {
        current: 1,
        total: 1,
    };
}

/// A single document change as streamed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    pub document_id: String,
    pub transaction_id: String,
    pub mutations: Vec<MutationOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<Effects>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub transition: Transition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_total_events: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_current_event: Option<u32>,
}

impl MutationEvent {
    /// Position within the transaction; missing values count as a single event
    pub fn event_number(&self) -> EventNumber {
        EventNumber {
            current: self.transaction_current_event.unwrap_or(1),
            total: self.transaction_total_events.unwrap_or(1),
        }
    }

    /// Fill in the event number for servers that predate it.
    ///
    /// A legacy transaction touching both ids of the pair (publish/unpublish)
    /// is split into two events: the side that disappears is emitted first.
    pub fn normalize(mut self, id_pair: &IdPair) -> Self {
        if self.transaction_total_events.is_none() {
            let targets = |id: &str| self.mutations.iter().any(|op| op.target_id() == Some(id));
            let spans_pair = targets(&id_pair.draft_id) && targets(&id_pair.published_id);

            let number = if spans_pair {
                EventNumber {
                    current: if self.transition == Transition::Disappear { 1 } else { 2 },
                    total: 2,
                }
            } else {
                EventNumber::SINGLE
            };

            self.transaction_total_events = Some(number.total);
            self.transaction_current_event = Some(number.current);
        } else if self.transaction_current_event.is_none() {
            self.transaction_current_event = Some(1);
        }
        self
    }

    /// The document-level view consumed by buffered documents
    pub fn to_mutation(&self) -> Mutation {
        Mutation {
            transaction_id: self.transaction_id.clone(),
            mutations: self.mutations.clone(),
            previous_rev: self.previous_rev.clone(),
            result_rev: self.result_rev.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Raw event as delivered by the server's listen endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Welcome { listener_name: Option<String> },
    Reconnect,
    Mutation(MutationEvent),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Welcome { .. } => "welcome",
            ServerEvent::Reconnect => "reconnect",
            ServerEvent::Mutation(_) => "mutation",
        }
    }
}

/// Document state fetched after a connection was established
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEvent {
    pub document_id: String,
    pub document: Option<Document>,
}

/// Ordered, transaction-consistent event for one document pair
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Reconnect,
    Snapshot(SnapshotEvent),
    Mutation(MutationEvent),
}

impl ListenerEvent {
    /// Id of the document the event concerns; reconnects concern both
    pub fn document_id(&self) -> Option<&str> {
        match self {
            ListenerEvent::Reconnect => None,
            ListenerEvent::Snapshot(snapshot) => Some(&snapshot.document_id),
            ListenerEvent::Mutation(mutation) => Some(&mutation.document_id),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pairsync_core::{Document, Patch};

    pub(crate) fn mutation_event(
        document_id: &str,
        transaction_id: &str,
        number: Option<(u32, u32)>,
    ) -> MutationEvent {
        MutationEvent {
            document_id: document_id.into(),
            transaction_id: transaction_id.into(),
            mutations: vec![MutationOp::Patch(Patch::new(document_id).set("title", "x"))],
            effects: None,
            previous_rev: None,
            result_rev: None,
            timestamp: None,
            transition: Transition::Update,
            visibility: Some(Visibility::Query),
            transaction_current_event: number.map(|(current, _)| current),
            transaction_total_events: number.map(|(_, total)| total),
        }
    }

    #[test]
    fn test_normalize_legacy_single() {
        let pair = IdPair::new("movie").unwrap();
        let ev = mutation_event("drafts.movie", "tx", None).normalize(&pair);
        assert_eq!(ev.event_number(), EventNumber::SINGLE);
    }

    #[test]
    fn test_normalize_legacy_publish() {
        let pair = IdPair::new("movie").unwrap();
        let mutations = vec![
            MutationOp::delete("drafts.movie"),
            MutationOp::CreateOrReplace(Document::new("movie", "movie")),
        ];

        let mut draft = mutation_event("drafts.movie", "tx", None);
        draft.mutations = mutations.clone();
        draft.transition = Transition::Disappear;

        let mut published = mutation_event("movie", "tx", None);
        published.mutations = mutations;
        published.transition = Transition::Appear;

        assert_eq!(
            draft.normalize(&pair).event_number(),
            EventNumber { current: 1, total: 2 }
        );
        assert_eq!(
            published.normalize(&pair).event_number(),
            EventNumber { current: 2, total: 2 }
        );
    }

    #[test]
    fn test_normalize_keeps_explicit_numbers() {
        let pair = IdPair::new("movie").unwrap();
        let ev = mutation_event("movie", "tx", Some((3, 4))).normalize(&pair);
        assert_eq!(ev.event_number(), EventNumber { current: 3, total: 4 });
    }

    #[test]
    fn test_mutation_event_wire_names() {
        let ev: MutationEvent = serde_json::from_value(serde_json::json!({
            "documentId": "movie",
            "transactionId": "tx",
            "mutations": [{"delete": {"id": "movie"}}],
            "resultRev": "r2",
            "transition": "disappear",
            "transactionTotalEvents": 2,
            "transactionCurrentEvent": 1
        }))
        .unwrap();
        assert_eq!(ev.event_number(), EventNumber { current: 1, total: 2 });
        assert_eq!(ev.transition, Transition::Disappear);
        assert_eq!(ev.to_mutation().result_rev.as_deref(), Some("r2"));
    }
}
