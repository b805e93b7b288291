//! Transaction grouping
//!
//! Mutation events belonging to one multi-document transaction are held back
//! until every member has arrived, then released together in arrival order.

use crate::event::MutationEvent;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Events of one transaction seen so far
#[derive(Debug, Default)]
struct PendingGroup {
    /// Epoch in which the first member arrived
    epoch: u64,
    seen: BTreeSet<u32>,
    events: Vec<MutationEvent>,
}

/// Holds incomplete transaction groups keyed by `(total, transaction_id)`
#[derive(Debug, Default)]
pub struct TransactionGrouper {
    groups: HashMap<(u32, String), PendingGroup>,
    epoch: u64,
}

impl TransactionGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one event; returns the whole group once it is complete
    pub fn push(&mut self, event: MutationEvent) -> Option<Vec<MutationEvent>> {
        let number = event.event_number();
        if number.total <= 1 {
            return Some(vec![event]);
        }

        if number.current == 0 || number.current > number.total {
            warn!(
                transaction_id = %event.transaction_id,
                current = number.current,
                total = number.total,
                "Event number out of range"
            );
        }

        let key = (number.total, event.transaction_id.clone());
        let epoch = self.epoch;
        let group = self.groups.entry(key.clone()).or_insert_with(|| PendingGroup {
            epoch,
            ..Default::default()
        });

        if !group.seen.insert(number.current) {
            warn!(
                transaction_id = %event.transaction_id,
                current = number.current,
                "Duplicate transaction event ignored"
            );
            return None;
        }
        group.events.push(event);

        if group.seen.len() < number.total as usize {
            debug!(
                transaction_id = %key.1,
                received = group.seen.len(),
                total = number.total,
                "Holding incomplete transaction"
            );
            return None;
        }

        self.groups.remove(&key).map(|group| group.events)
    }

    /// Number of transactions currently held back
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Stamp groups opened from now on with `epoch`
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Drop incomplete groups opened before `epoch`, returning how many events were discarded
    pub fn evict_before(&mut self, epoch: u64) -> usize {
        let mut dropped = 0;
        self.groups.retain(|_, group| {
            let keep = group.epoch >= epoch;
            if !keep {
                dropped += group.events.len();
            }
            keep
        });
        dropped
    }

    /// Drop all incomplete groups, returning how many events were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.groups.values().map(|g| g.events.len()).sum();
        self.groups.clear();
        dropped
    }
}
