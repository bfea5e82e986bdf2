//! crates/recitation_core/src/completion.rs
//!
//! The per-container completion model: a set of completed positions, the
//! statistics derived from it, and the optimistic layer that lets a client
//! show a mark before the backend has confirmed it.

use std::collections::BTreeSet;

/// `round(count / total × 100)`, or 0 for an empty container.
pub fn completion_percentage(count: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(count) / f64::from(total) * 100.0).round() as u32
}

//=========================================================================================
// CompletionSet
//=========================================================================================

/// The completed positions of one container. Only positions in `[1, total]` are
/// ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionSet {
    total: u32,
    positions: BTreeSet<u32>,
}

impl CompletionSet {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            positions: BTreeSet::new(),
        }
    }

    /// Builds a set from backend data, silently dropping out-of-range positions.
    pub fn from_positions(total: u32, positions: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::new(total);
        set.extend(positions);
        set
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_valid_position(&self, position: u32) -> bool {
        (1..=self.total).contains(&position)
    }

    pub fn contains(&self, position: u32) -> bool {
        self.positions.contains(&position)
    }

    /// Returns `true` when the position was newly added.
    pub fn insert(&mut self, position: u32) -> bool {
        self.is_valid_position(position) && self.positions.insert(position)
    }

    pub fn extend(&mut self, positions: impl IntoIterator<Item = u32>) {
        for position in positions {
            self.insert(position);
        }
    }

    pub fn remove(&mut self, position: u32) -> bool {
        self.positions.remove(&position)
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        self.positions.iter().copied()
    }

    pub fn completed_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn percentage(&self) -> u32 {
        completion_percentage(self.completed_count(), self.total)
    }

    /// Smallest position in `[1, total]` not yet complete; `None` once every
    /// position is complete.
    pub fn first_gap(&self) -> Option<u32> {
        (1..=self.total).find(|p| !self.positions.contains(p))
    }

    /// Every incomplete position from 1 up to and including `position`, ascending.
    pub fn missing_through(&self, position: u32) -> Vec<u32> {
        (1..=position.min(self.total))
            .filter(|p| !self.positions.contains(p))
            .collect()
    }
}

//=========================================================================================
// Optimistic reconciliation
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeltaId(pub u64);

/// A batch of positions shown as complete before the backend has answered.
/// A delta lives until it is confirmed or rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionDelta {
    pub id: DeltaId,
    pub positions: Vec<u32>,
}

/// Confirmed completions plus the deltas still waiting on the backend.
///
/// Deltas may overlap. A position is shown while the confirmed set or any
/// pending delta carries it, so rolling one delta back never takes away a mark
/// another delta still owns.
#[derive(Debug, Clone, Default)]
pub struct OptimisticCompletions {
    confirmed: CompletionSet,
    deltas: Vec<CompletionDelta>,
    next_id: u64,
}

impl OptimisticCompletions {
    pub fn new(confirmed: CompletionSet) -> Self {
        Self {
            confirmed,
            deltas: Vec::new(),
            next_id: 0,
        }
    }

    pub fn confirmed(&self) -> &CompletionSet {
        &self.confirmed
    }

    pub fn pending(&self) -> impl Iterator<Item = &CompletionDelta> {
        self.deltas.iter()
    }

    /// What the user sees: confirmed marks plus every pending delta.
    pub fn view(&self) -> CompletionSet {
        project(&self.confirmed, &self.deltas)
    }

    /// Records an optimistic mark for the positions not yet confirmed. Positions
    /// only covered by a pending delta are carried again, so their mark survives
    /// that delta failing. Returns `None` when every position is already
    /// confirmed and no backend call is needed.
    pub fn propose(&mut self, positions: &[u32]) -> Option<CompletionDelta> {
        let confirmed = &self.confirmed;
        let mut fresh: Vec<u32> = positions
            .iter()
            .copied()
            .filter(|p| confirmed.is_valid_position(*p) && !confirmed.contains(*p))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();
        if fresh.is_empty() {
            return None;
        }

        let delta = CompletionDelta {
            id: DeltaId(self.next_id),
            positions: fresh,
        };
        self.next_id += 1;
        self.deltas.push(delta.clone());
        Some(delta)
    }

    /// Folds a pending delta into the confirmed set.
    pub fn confirm(&mut self, id: DeltaId) -> bool {
        let Some(delta) = self.take_pending(id) else {
            return false;
        };
        self.confirmed.extend(delta.positions.iter().copied());
        true
    }

    /// Drops a pending delta; the view falls back to confirmed ∪ remaining deltas.
    pub fn roll_back(&mut self, id: DeltaId) -> bool {
        self.take_pending(id).is_some()
    }

    /// Forgets every mark, confirmed or pending, keeping the container size.
    pub fn reset(&mut self) {
        self.confirmed.clear();
        self.deltas.clear();
    }

    fn take_pending(&mut self, id: DeltaId) -> Option<CompletionDelta> {
        let index = self
            .deltas
            .iter()
            .position(|d| d.id == id)?;
        Some(self.deltas.remove(index))
    }
}

/// The displayed set as a pure function of the confirmed set and the pending deltas.
pub fn project(confirmed: &CompletionSet, deltas: &[CompletionDelta]) -> CompletionSet {
    let mut view = confirmed.clone();
    for delta in deltas {
        view.extend(delta.positions.iter().copied());
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_gap_is_smallest_missing_position() {
        let set = CompletionSet::from_positions(6, [1, 2, 3, 5]);
        assert_eq!(set.first_gap(), Some(4));
        assert_eq!(set.completed_count(), 4);
        assert_eq!(set.percentage(), 67);
    }

    #[test]
    fn full_set_has_no_gap() {
        let set = CompletionSet::from_positions(3, [3, 1, 2]);
        assert_eq!(set.first_gap(), None);
        assert_eq!(set.completed_count(), 3);
        assert_eq!(set.percentage(), 100);
    }

    #[test]
    fn empty_set_gap_starts_at_one() {
        let set = CompletionSet::new(12);
        assert_eq!(set.first_gap(), Some(1));
        assert_eq!(set.percentage(), 0);
    }

    #[test]
    fn out_of_range_positions_are_ignored() {
        let mut set = CompletionSet::new(4);
        assert!(!set.insert(0));
        assert!(!set.insert(5));
        assert!(set.insert(4));
        assert!(!set.insert(4));
        assert_eq!(set.positions().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn missing_through_lists_unfinished_prefix() {
        let set = CompletionSet::from_positions(10, [2, 4]);
        assert_eq!(set.missing_through(5), vec![1, 3, 5]);
        assert_eq!(set.missing_through(40).len(), 8);
    }

    #[test]
    fn proposing_twice_is_idempotent() {
        let mut store = OptimisticCompletions::new(CompletionSet::new(7));
        let first = store.propose(&[3]).unwrap();
        let once = store.view();
        store.propose(&[3]);
        assert_eq!(store.view(), once);

        store.confirm(first.id);
        assert!(store.propose(&[3]).is_none());
        assert_eq!(store.view(), once);
    }

    #[test]
    fn rollback_restores_confirmed_view_only_for_failed_delta() {
        let mut store = OptimisticCompletions::new(CompletionSet::from_positions(10, [1]));
        let first = store.propose(&[2, 3]).unwrap();
        let second = store.propose(&[3, 4]).unwrap();
        assert_eq!(second.positions, vec![3, 4]);

        assert!(store.roll_back(first.id));
        let view = store.view();
        assert_eq!(view.positions().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(view.first_gap(), Some(2));

        assert!(store.confirm(second.id));
        assert_eq!(store.confirmed().completed_count(), 3);
        assert!(!store.confirm(first.id));
    }

    #[test]
    fn mark_inside_a_pending_batch_survives_the_batch_failing() {
        let mut store = OptimisticCompletions::new(CompletionSet::new(6));
        let batch = store.propose(&[1, 2, 3, 4]).unwrap();
        let single = store.propose(&[3]).unwrap();
        assert_eq!(single.positions, vec![3]);

        assert!(store.roll_back(batch.id));
        assert_eq!(store.view().positions().collect::<Vec<_>>(), vec![3]);
        assert!(store.confirm(single.id));
        assert!(store.confirmed().contains(3));
    }

    #[test]
    fn reset_drops_pending_marks() {
        let mut store = OptimisticCompletions::new(CompletionSet::from_positions(5, [1, 2]));
        store.propose(&[3]);
        store.reset();
        assert_eq!(store.view().completed_count(), 0);
        assert_eq!(store.view().first_gap(), Some(1));
        assert_eq!(store.pending().count(), 0);
    }
}
