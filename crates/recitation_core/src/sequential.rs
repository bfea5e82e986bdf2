//! crates/recitation_core/src/sequential.rs
//!
//! Sequential completion: only the unbroken run of completed items from the very
//! first item of the corpus counts as true progress. A completed item after a gap
//! contributes nothing until the gap is closed.

use crate::domain::ContainerId;
use std::collections::{BTreeMap, BTreeSet};

/// Completed positions keyed by container, across the whole corpus.
pub type CorpusCompletions = BTreeMap<ContainerId, BTreeSet<u32>>;

/// Length of the longest fully complete prefix of the corpus.
///
/// `layout` lists every container in corpus order with its item count.
pub fn sequential_prefix_len(layout: &[(ContainerId, u32)], completions: &CorpusCompletions) -> u32 {
    let mut count = 0;
    for (container, total) in layout {
        let done = completions.get(container);
        for position in 1..=*total {
            if !done.is_some_and(|set| set.contains(&position)) {
                return count;
            }
            count += 1;
        }
    }
    count
}

/// First (container, position) not yet complete in corpus order, if any.
pub fn first_incomplete(
    layout: &[(ContainerId, u32)],
    completions: &CorpusCompletions,
) -> Option<(ContainerId, u32)> {
    layout.iter().find_map(|(container, total)| {
        let done = completions.get(container);
        (1..=*total)
            .find(|p| !done.is_some_and(|set| set.contains(p)))
            .map(|p| (*container, p))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completions(entries: &[(u32, &[u32])]) -> CorpusCompletions {
        entries
            .iter()
            .map(|(c, ps)| (ContainerId(*c), ps.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn gap_stops_the_prefix() {
        let layout = [(ContainerId(1), 6), (ContainerId(2), 4)];
        let done = completions(&[(1, &[1, 2, 3, 5])]);
        assert_eq!(sequential_prefix_len(&layout, &done), 3);
        assert_eq!(first_incomplete(&layout, &done), Some((ContainerId(1), 4)));
    }

    #[test]
    fn later_container_does_not_count_past_a_gap() {
        let layout = [(ContainerId(1), 3), (ContainerId(2), 3)];
        let done = completions(&[(1, &[1, 3]), (2, &[1, 2, 3])]);
        assert_eq!(sequential_prefix_len(&layout, &done), 1);
    }

    #[test]
    fn closing_the_gap_extends_across_containers() {
        let layout = [(ContainerId(1), 3), (ContainerId(2), 3)];
        let done = completions(&[(1, &[1, 2, 3]), (2, &[1, 2])]);
        assert_eq!(sequential_prefix_len(&layout, &done), 5);
        assert_eq!(first_incomplete(&layout, &done), Some((ContainerId(2), 3)));
    }

    #[test]
    fn complete_corpus_has_no_first_incomplete() {
        let layout = [(ContainerId(1), 2)];
        let done = completions(&[(1, &[1, 2])]);
        assert_eq!(sequential_prefix_len(&layout, &done), 2);
        assert_eq!(first_incomplete(&layout, &done), None);
    }
}
