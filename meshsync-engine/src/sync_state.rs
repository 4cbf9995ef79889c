//! Per-collection readiness flags.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use meshsync_core::CollectionId;

/// Tracks which collections have received at least one batch.
///
/// The key set is fixed at construction and flags only ever go from `false`
/// to `true`, so readers need no lock.
#[derive(Debug, Default)]
pub struct SyncTracker {
    flags: BTreeMap<CollectionId, AtomicBool>,
}

impl SyncTracker {
    pub fn new(collections: impl IntoIterator<Item = CollectionId>) -> Self {
        Self {
            flags: collections
                .into_iter()
                .map(|c| (c, AtomicBool::new(false)))
                .collect(),
        }
    }

    /// Mark `collection` synced. Returns `true` when this call completed the
    /// set, i.e. the tracker just became ready.
    pub fn mark(&self, collection: &CollectionId) -> bool {
        let Some(flag) = self.flags.get(collection) else {
            return false;
        };
        if flag.swap(true, Ordering::AcqRel) {
            return false;
        }
        let ready = self.has_synced();
        if ready {
            tracing::info!(collections = self.flags.len(), "all collections synced");
        }
        ready
    }

    pub fn is_synced(&self, collection: &CollectionId) -> bool {
        self.flags
            .get(collection)
            .is_some_and(|f| f.load(Ordering::Acquire))
    }

    pub fn has_synced(&self) -> bool {
        self.flags.values().all(|f| f.load(Ordering::Acquire))
    }

    /// Collections still waiting for their first batch.
    pub fn pending(&self) -> Vec<CollectionId> {
        self.flags
            .iter()
            .filter(|(_, f)| !f.load(Ordering::Acquire))
            .map(|(c, _)| c.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_only_once_every_collection_marked() {
        let a = CollectionId::from("a");
        let b = CollectionId::from("b");
        let tracker = SyncTracker::new([a.clone(), b.clone()]);
        assert!(!tracker.has_synced());

        assert!(!tracker.mark(&a));
        assert!(tracker.is_synced(&a));
        assert_eq!(tracker.pending(), vec![b.clone()]);

        assert!(tracker.mark(&b));
        assert!(tracker.has_synced());
        // Re-marking never reports the transition again nor regresses.
        assert!(!tracker.mark(&b));
        assert!(tracker.has_synced());
    }

    #[test]
    fn unknown_collection_is_ignored() {
        let tracker = SyncTracker::new([CollectionId::from("a")]);
        assert!(!tracker.mark(&CollectionId::from("other")));
        assert!(!tracker.has_synced());
    }
}
