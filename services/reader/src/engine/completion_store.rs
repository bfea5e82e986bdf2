//! services/reader/src/engine/completion_store.rs
//!
//! The mounted container's completion marks, shown optimistically and reconciled
//! with the backend, plus the latest sequential-progress snapshot.

use recitation_core::completion::{CompletionDelta, CompletionSet, DeltaId, OptimisticCompletions};
use recitation_core::domain::{CompletionStats, SequentialProgress};

/// Derived values the view renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSnapshot {
    pub completed_count: u32,
    pub percentage: u32,
    pub first_gap: Option<u32>,
}

impl From<&CompletionSet> for CompletionSnapshot {
    fn from(set: &CompletionSet) -> Self {
        Self {
            completed_count: set.completed_count(),
            percentage: set.percentage(),
            first_gap: set.first_gap(),
        }
    }
}

#[derive(Debug)]
pub struct CompletionStore {
    completions: OptimisticCompletions,
}

impl CompletionStore {
    pub fn new(total: u32) -> Self {
        Self {
            completions: OptimisticCompletions::new(CompletionSet::new(total)),
        }
    }

    /// Replaces everything with what the backend reported.
    pub fn load(&mut self, stats: &CompletionStats) {
        let total = self.completions.confirmed().total();
        let confirmed = CompletionSet::from_positions(total, stats.completed_positions.iter().copied());
        self.completions = OptimisticCompletions::new(confirmed);
    }

    pub fn view(&self) -> CompletionSet {
        self.completions.view()
    }

    pub fn snapshot(&self) -> CompletionSnapshot {
        CompletionSnapshot::from(&self.view())
    }

    pub fn is_complete(&self, position: u32) -> bool {
        self.view().contains(position)
    }

    /// Optimistically marks one position. `None` means the backend already
    /// confirmed it and no call is needed.
    pub fn mark(&mut self, position: u32) -> Option<CompletionDelta> {
        self.completions.propose(&[position])
    }

    /// Optimistically marks a batch; only positions not yet confirmed are sent.
    pub fn mark_batch(&mut self, positions: &[u32]) -> Option<CompletionDelta> {
        self.completions.propose(positions)
    }

    /// The backfill batch for a reader who has reached `position`: every
    /// position from 1 through it that is not complete yet.
    pub fn backfill_through(&self, position: u32) -> Vec<u32> {
        self.view().missing_through(position)
    }

    pub fn confirm(&mut self, delta: DeltaId) -> bool {
        self.completions.confirm(delta)
    }

    pub fn roll_back(&mut self, delta: DeltaId) -> bool {
        self.completions.roll_back(delta)
    }

    /// Count and percentage to 0 and first gap to 1. The last-read position
    /// lives elsewhere and is untouched.
    pub fn clear(&mut self) {
        self.completions.reset();
    }
}

/// Client side of the sequential-completion recomputation: the backend holds
/// the truth, the client asks for it after every gap-affecting change.
#[derive(Debug, Default)]
pub struct SequentialCompletionValidator {
    latest: Option<SequentialProgress>,
}

impl SequentialCompletionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&SequentialProgress> {
        self.latest.as_ref()
    }

    /// Stores a fresh snapshot; returns whether it differs from the previous one.
    pub fn update(&mut self, progress: SequentialProgress) -> bool {
        let changed = self.latest.as_ref() != Some(&progress);
        self.latest = Some(progress);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(positions: &[u32]) -> CompletionStats {
        CompletionStats {
            total_items: 12,
            completed_count: positions.len() as u32,
            completion_percentage: 0.0,
            first_unread: None,
            completed_positions: positions.to_vec(),
        }
    }

    #[test]
    fn marking_twice_matches_marking_once() {
        let mut store = CompletionStore::new(6);
        let delta = store.mark(2).unwrap();
        let once = store.view();
        store.mark(2);
        assert_eq!(store.view(), once);
        store.confirm(delta.id);
        assert!(store.mark(2).is_none());
    }

    #[test]
    fn batch_keeps_first_gap_consistent_with_union() {
        let mut store = CompletionStore::new(12);
        store.load(&stats(&[1, 2, 6]));
        let delta = store.mark_batch(&[3, 4, 5, 6]).unwrap();
        assert_eq!(delta.positions, vec![3, 4, 5]);
        assert_eq!(store.snapshot().first_gap, Some(7));
        assert_eq!(store.snapshot().completed_count, 6);
    }

    #[test]
    fn failed_mark_is_rolled_back() {
        let mut store = CompletionStore::new(4);
        let delta = store.mark(1).unwrap();
        assert_eq!(store.snapshot().percentage, 25);
        assert!(store.roll_back(delta.id));
        assert_eq!(
            store.snapshot(),
            CompletionSnapshot {
                completed_count: 0,
                percentage: 0,
                first_gap: Some(1)
            }
        );
    }

    #[test]
    fn clear_resets_to_first_position() {
        let mut store = CompletionStore::new(12);
        store.load(&stats(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]));
        assert_eq!(store.snapshot().percentage, 83);
        store.clear();
        assert_eq!(
            store.snapshot(),
            CompletionSnapshot {
                completed_count: 0,
                percentage: 0,
                first_gap: Some(1)
            }
        );
    }

    #[test]
    fn backfill_lists_every_unfinished_item_up_to_current() {
        let mut store = CompletionStore::new(12);
        store.load(&stats(&[2]));
        assert_eq!(store.backfill_through(5), vec![1, 3, 4, 5]);
    }
}
