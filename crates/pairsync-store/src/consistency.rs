//! Consistency tracking
//!
//! A pair is consistent when neither version holds edits the server has not
//! acknowledged. Subscribers only observe changes of the combined flag.

use crate::error::{Result, StoreError};
use pairsync_core::DocumentVariant;
use tokio::sync::watch;

/// Per-version consistency flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyState {
    pub draft_consistent: bool,
    pub published_consistent: bool,
}

impl ConsistencyState {
    pub fn is_consistent(&self) -> bool {
        self.draft_consistent && self.published_consistent
    }
}

impl Default for ConsistencyState {
    fn default() -> Self {
        Self {
            draft_consistent: true,
            published_consistent: true,
        }
    }
}

/// Writer side, owned by the pair
#[derive(Debug)]
pub struct ConsistencyTracker {
    state: watch::Sender<ConsistencyState>,
    combined: watch::Sender<bool>,
}

impl ConsistencyTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConsistencyState::default());
        let (combined, _) = watch::channel(true);
        Self { state, combined }
    }

    /// Record one version's flag; subscribers wake only if the combined value changed
    pub fn update(&self, variant: DocumentVariant, consistent: bool) {
        self.state.send_if_modified(|state| {
            let flag = match variant {
                DocumentVariant::Draft => &mut state.draft_consistent,
                DocumentVariant::Published => &mut state.published_consistent,
            };
            let changed = *flag != consistent;
            *flag = consistent;
            changed
        });

        let combined = self.state.borrow().is_consistent();
        self.combined.send_if_modified(|current| {
            let changed = *current != combined;
            *current = combined;
            changed
        });
    }

    pub fn state(&self) -> ConsistencyState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> ConsistencyStatus {
        ConsistencyStatus {
            state: self.state.subscribe(),
            combined: self.combined.subscribe(),
        }
    }
}

impl Default for ConsistencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader side: the "fully synced" signal of one pair
#[derive(Debug, Clone)]
pub struct ConsistencyStatus {
    state: watch::Receiver<ConsistencyState>,
    combined: watch::Receiver<bool>,
}

impl ConsistencyStatus {
    pub fn is_consistent(&self) -> bool {
        *self.combined.borrow()
    }

    pub fn state(&self) -> ConsistencyState {
        *self.state.borrow()
    }

    /// Wait for the combined flag to change and return the new value
    pub async fn changed(&mut self) -> Result<bool> {
        self.combined.changed().await.map_err(|_| StoreError::Closed)?;
        Ok(*self.combined.borrow_and_update())
    }

    /// Resolve once the pair is consistent
    pub async fn wait_consistent(&mut self) -> Result<()> {
        self.combined
            .wait_for(|consistent| *consistent)
            .await
            .map(|_| ())
            .map_err(|_| StoreError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_combined_is_logical_and() {
        let tracker = ConsistencyTracker::new();
        let status = tracker.subscribe();
        assert!(status.is_consistent());

        tracker.update(DocumentVariant::Draft, false);
        assert!(!status.is_consistent());
        tracker.update(DocumentVariant::Published, false);
        tracker.update(DocumentVariant::Draft, true);
        assert!(!status.is_consistent());
        assert_eq!(
            status.state(),
            ConsistencyState {
                draft_consistent: true,
                published_consistent: false
            }
        );
        tracker.update(DocumentVariant::Published, true);
        assert!(status.is_consistent());
    }

    #[tokio::test]
    async fn test_changes_are_deduplicated() {
        let tracker = ConsistencyTracker::new();
        let mut status = tracker.subscribe();

        tracker.update(DocumentVariant::Draft, false);
        assert!(!status.changed().await.unwrap());

        // Still inconsistent overall, so no notification
        tracker.update(DocumentVariant::Published, false);
        tracker.update(DocumentVariant::Draft, true);
        assert!(timeout(Duration::from_millis(20), status.changed()).await.is_err());

        tracker.update(DocumentVariant::Published, true);
        assert!(status.changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_consistent() {
        let tracker = ConsistencyTracker::new();
        let mut status = tracker.subscribe();
        tracker.update(DocumentVariant::Draft, false);

        let waiter = tokio::spawn(async move { status.wait_consistent().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tracker.update(DocumentVariant::Draft, true);
        timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
