//! services/reader/src/engine/persister.rs
//!
//! Debounced "last read position" writer. Playback and passive scrolling each
//! have their own idle window, but both end up in the same backend record.

use super::timers::{TimerKind, Timers};
use recitation_core::domain::LastPosition;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSource {
    Playback,
    Scroll,
}

impl PositionSource {
    pub fn timer(self) -> TimerKind {
        match self {
            PositionSource::Playback => TimerKind::PersistPlayback,
            PositionSource::Scroll => TimerKind::PersistScroll,
        }
    }

    pub fn from_timer(kind: TimerKind) -> Option<Self> {
        match kind {
            TimerKind::PersistPlayback => Some(PositionSource::Playback),
            TimerKind::PersistScroll => Some(PositionSource::Scroll),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ProgressPersister {
    debounce: Duration,
    playback: Option<LastPosition>,
    scroll: Option<LastPosition>,
}

impl ProgressPersister {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            playback: None,
            scroll: None,
        }
    }

    fn slot(&mut self, source: PositionSource) -> &mut Option<LastPosition> {
        match source {
            PositionSource::Playback => &mut self.playback,
            PositionSource::Scroll => &mut self.scroll,
        }
    }

    /// Replaces the pending position for `source` and restarts its idle window.
    pub fn record(&mut self, source: PositionSource, position: LastPosition, timers: &mut Timers) {
        *self.slot(source) = Some(position);
        timers.schedule(source.timer(), self.debounce);
    }

    /// The position to write now that the idle window for `source` has elapsed.
    pub fn take(&mut self, source: PositionSource) -> Option<LastPosition> {
        self.slot(source).take()
    }

    pub fn pending(&self, source: PositionSource) -> Option<LastPosition> {
        match source {
            PositionSource::Playback => self.playback,
            PositionSource::Scroll => self.scroll,
        }
    }

    /// Drops every unsent position along with its timer.
    pub fn cancel_all(&mut self, timers: &mut Timers) {
        self.playback = None;
        self.scroll = None;
        timers.cancel(TimerKind::PersistPlayback);
        timers.cancel(TimerKind::PersistScroll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recitation_core::domain::{ContainerId, ItemId};
    use tokio::time::Instant;

    fn at(position: u32) -> LastPosition {
        LastPosition {
            container: ContainerId(1),
            item_id: ItemId(position),
            position,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_position() {
        let mut timers = Timers::new();
        let mut persister = ProgressPersister::new(Duration::from_secs(2));

        persister.record(PositionSource::Playback, at(1), &mut timers);
        tokio::time::advance(Duration::from_millis(200)).await;
        persister.record(PositionSource::Playback, at(2), &mut timers);
        tokio::time::advance(Duration::from_millis(200)).await;
        persister.record(PositionSource::Playback, at(3), &mut timers);

        tokio::time::advance(Duration::from_millis(1900)).await;
        assert!(timers.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(200)).await;
        let due = timers.take_due(Instant::now());
        assert_eq!(due, vec![TimerKind::PersistPlayback]);
        assert_eq!(persister.take(PositionSource::Playback), Some(at(3)));
        assert_eq!(persister.take(PositionSource::Playback), None);
    }

    #[test]
    fn sources_are_debounced_independently() {
        let mut timers = Timers::new();
        let mut persister = ProgressPersister::new(Duration::from_secs(2));
        persister.record(PositionSource::Playback, at(4), &mut timers);
        persister.record(PositionSource::Scroll, at(9), &mut timers);
        assert_eq!(persister.pending(PositionSource::Playback), Some(at(4)));
        assert_eq!(persister.pending(PositionSource::Scroll), Some(at(9)));

        persister.cancel_all(&mut timers);
        assert_eq!(timers.next_deadline(), None);
        assert_eq!(persister.pending(PositionSource::Scroll), None);
    }
}
