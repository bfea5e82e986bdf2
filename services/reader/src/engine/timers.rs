//! services/reader/src/engine/timers.rs
//!
//! Deadline timers owned by the session actor. Scheduling a kind that already has
//! a deadline replaces it, so only the latest request for each kind ever fires.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Debounced "last position" write fed by playback.
    PersistPlayback,
    /// Debounced "last position" write fed by passive scrolling.
    PersistScroll,
    /// Reading-observer dwell before a backfill.
    Dwell,
    /// Settling delay between a playback start and its prefetch.
    PrefetchSettle,
}

#[derive(Debug, Default)]
pub struct Timers {
    deadlines: HashMap<TimerKind, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `kind` to fire `after` from now, cancelling any earlier deadline for it.
    pub fn schedule(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines.insert(kind, Instant::now() + after);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(kind, at)| (*at, *kind))
            .collect();
        due.sort();
        for (_, kind) in &due {
            self.deadlines.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rescheduling_pushes_the_deadline_back() {
        let mut timers = Timers::new();
        timers.schedule(TimerKind::PersistPlayback, Duration::from_secs(2));
        tokio::time::advance(Duration::from_millis(1500)).await;
        timers.schedule(TimerKind::PersistPlayback, Duration::from_secs(2));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(timers.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(timers.take_due(Instant::now()), vec![TimerKind::PersistPlayback]);
        assert!(!timers.is_armed(TimerKind::PersistPlayback));
    }

    #[tokio::test(start_paused = true)]
    async fn due_timers_come_back_in_deadline_order() {
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Dwell, Duration::from_millis(300));
        timers.schedule(TimerKind::PrefetchSettle, Duration::from_millis(100));
        timers.schedule(TimerKind::PersistScroll, Duration::from_secs(5));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(
            timers.take_due(Instant::now()),
            vec![TimerKind::PrefetchSettle, TimerKind::Dwell]
        );
        assert!(timers.next_deadline().is_some());
    }
}
