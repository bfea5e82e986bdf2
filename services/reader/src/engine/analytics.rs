//! services/reader/src/engine/analytics.rs
//!
//! Tracks the one listening-analytics session that may be open at a time. The
//! backend assigns the id asynchronously, so a session can be closed before it
//! has finished opening; the late id is then closed as soon as it arrives.

use chrono::{DateTime, Utc};
use recitation_core::domain::{AnalyticsSession, Edition, ItemRef};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenTicket(pub u64);

/// A close the session must send to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClose {
    pub id: Uuid,
    pub duration_secs: u64,
}

#[derive(Debug)]
enum TrackerState {
    Idle,
    Opening {
        ticket: OpenTicket,
        item: ItemRef,
        edition: Edition,
        started_at: DateTime<Utc>,
    },
    Open(AnalyticsSession),
}

#[derive(Debug)]
pub struct AnalyticsSessionTracker {
    state: TrackerState,
    /// An open request that was closed before its id came back.
    abandoned: Option<(OpenTicket, DateTime<Utc>, DateTime<Utc>)>,
    next_ticket: u64,
}

impl Default for AnalyticsSessionTracker {
    fn default() -> Self {
        Self {
            state: TrackerState::Idle,
            abandoned: None,
            next_ticket: 0,
        }
    }
}

fn whole_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}

impl AnalyticsSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, TrackerState::Idle)
    }

    pub fn session(&self) -> Option<&AnalyticsSession> {
        match &self.state {
            TrackerState::Open(session) => Some(session),
            _ => None,
        }
    }

    /// Starts opening a session. The caller closes any previous one first.
    pub fn begin(&mut self, item: ItemRef, edition: Edition, now: DateTime<Utc>) -> OpenTicket {
        self.next_ticket += 1;
        let ticket = OpenTicket(self.next_ticket);
        self.state = TrackerState::Opening {
            ticket,
            item,
            edition,
            started_at: now,
        };
        ticket
    }

    /// The backend assigned `id`. Returns a close to send when the session was
    /// already abandoned.
    pub fn opened(&mut self, ticket: OpenTicket, id: Uuid) -> Option<SessionClose> {
        match &self.state {
            TrackerState::Opening {
                ticket: current,
                item,
                edition,
                started_at,
            } if *current == ticket => {
                self.state = TrackerState::Open(AnalyticsSession {
                    id,
                    item: *item,
                    edition: edition.clone(),
                    started_at: *started_at,
                });
                None
            }
            _ => match self.abandoned.take() {
                Some((abandoned, started_at, closed_at)) if abandoned == ticket => Some(SessionClose {
                    id,
                    duration_secs: whole_seconds(started_at, closed_at),
                }),
                other => {
                    self.abandoned = other;
                    Some(SessionClose { id, duration_secs: 0 })
                }
            },
        }
    }

    /// Opening failed; nothing to close.
    pub fn open_failed(&mut self, ticket: OpenTicket) {
        if matches!(&self.state, TrackerState::Opening { ticket: current, .. } if *current == ticket) {
            self.state = TrackerState::Idle;
        }
        if matches!(self.abandoned, Some((abandoned, _, _)) if abandoned == ticket) {
            self.abandoned = None;
        }
    }

    /// Closes the active session exactly once. Returns the backend close to send,
    /// if the id is already known.
    pub fn close(&mut self, now: DateTime<Utc>) -> Option<SessionClose> {
        match std::mem::replace(&mut self.state, TrackerState::Idle) {
            TrackerState::Idle => None,
            TrackerState::Opening {
                ticket, started_at, ..
            } => {
                self.abandoned = Some((ticket, started_at, now));
                None
            }
            TrackerState::Open(session) => Some(SessionClose {
                id: session.id,
                duration_secs: whole_seconds(session.started_at, now),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recitation_core::domain::{ContainerId, ItemId};

    fn item() -> ItemRef {
        ItemRef {
            item_id: ItemId(8),
            container: ContainerId(2),
            position: 1,
        }
    }

    #[test]
    fn close_reports_elapsed_seconds_once() {
        let mut tracker = AnalyticsSessionTracker::new();
        let t0 = Utc::now();
        let ticket = tracker.begin(item(), Edition::default(), t0);
        let id = Uuid::new_v4();
        assert_eq!(tracker.opened(ticket, id), None);
        assert!(tracker.session().is_some());

        let close = tracker.close(t0 + Duration::seconds(7)).unwrap();
        assert_eq!(close, SessionClose { id, duration_secs: 7 });
        assert_eq!(tracker.close(t0 + Duration::seconds(9)), None);
        assert!(!tracker.is_active());
    }

    #[test]
    fn session_closed_while_opening_is_closed_on_arrival() {
        let mut tracker = AnalyticsSessionTracker::new();
        let t0 = Utc::now();
        let ticket = tracker.begin(item(), Edition::default(), t0);
        assert_eq!(tracker.close(t0 + Duration::seconds(3)), None);

        let id = Uuid::new_v4();
        let close = tracker.opened(ticket, id).unwrap();
        assert_eq!(close.duration_secs, 3);
        assert!(!tracker.is_active());
    }

    #[test]
    fn failed_open_leaves_tracker_idle() {
        let mut tracker = AnalyticsSessionTracker::new();
        let ticket = tracker.begin(item(), Edition::default(), Utc::now());
        tracker.open_failed(ticket);
        assert!(!tracker.is_active());
        assert_eq!(tracker.close(Utc::now()), None);
    }
}
