//! services/reader/src/engine/playback.rs
//!
//! The playback state machine. The session owns the media element; this type owns
//! every decision about which item is current and what state the user sees.

use recitation_core::domain::{Edition, PlaybackStatus};

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Identifies one start attempt; results for an older ticket are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket(pub u64);

/// What the session must do to begin an item.
#[derive(Debug, Clone, PartialEq)]
pub struct StartPlan {
    pub ticket: StartTicket,
    pub index: usize,
    pub edition: Edition,
    pub url: String,
    /// Load only and settle in `Paused` (an edition switch while paused).
    pub hold_paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    AlreadyPaused,
}

#[derive(Debug)]
pub struct PlaybackController {
    status: PlaybackStatus,
    current: Option<usize>,
    last_played: Option<usize>,
    edition: Edition,
    continuous: bool,
    auto_advance: bool,
    speed: f32,
    volume: f32,
    source_url: Option<String>,
    ticket: u64,
    hold_paused: bool,
}

impl PlaybackController {
    pub fn new(edition: Edition, auto_advance: bool) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current: None,
            last_played: None,
            edition,
            continuous: false,
            auto_advance,
            speed: 1.0,
            volume: 1.0,
            source_url: None,
            ticket: 0,
            hold_paused: false,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn last_played(&self) -> Option<usize> {
        self.last_played
    }

    pub fn edition(&self) -> &Edition {
        &self.edition
    }

    pub fn continuous(&self) -> bool {
        self.continuous
    }

    pub fn set_continuous(&mut self, on: bool) {
        self.continuous = on;
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn set_auto_advance(&mut self, on: bool) {
        self.auto_advance = on;
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f32) -> f32 {
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.speed
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = volume.clamp(0.0, 1.0);
        self.volume
    }

    /// True while the user is actively listening (or about to be).
    pub fn is_listening(&self) -> bool {
        matches!(self.status, PlaybackStatus::Loading | PlaybackStatus::Playing)
    }

    pub fn is_playing(&self, index: usize) -> bool {
        self.current == Some(index) && self.is_listening()
    }

    /// Enters `Loading` for `index`, superseding any start still in flight.
    pub fn begin(&mut self, index: usize, edition: Edition, url: String, hold_paused: bool) -> StartPlan {
        self.ticket += 1;
        self.status = PlaybackStatus::Loading;
        self.current = Some(index);
        self.last_played = Some(index);
        self.edition = edition.clone();
        self.source_url = Some(url.clone());
        self.hold_paused = hold_paused;
        StartPlan {
            ticket: StartTicket(self.ticket),
            index,
            edition,
            url,
            hold_paused,
        }
    }

    fn is_current_ticket(&self, ticket: StartTicket) -> bool {
        ticket.0 == self.ticket && self.status == PlaybackStatus::Loading
    }

    /// The media element can play. Returns the state entered, or `None` when the
    /// ticket was superseded.
    pub fn started(&mut self, ticket: StartTicket) -> Option<PlaybackStatus> {
        if !self.is_current_ticket(ticket) {
            return None;
        }
        self.status = if self.hold_paused {
            PlaybackStatus::Paused
        } else {
            PlaybackStatus::Playing
        };
        self.hold_paused = false;
        Some(self.status)
    }

    /// The start failed; returns the index that failed when the ticket was current.
    pub fn start_failed(&mut self, ticket: StartTicket) -> Option<usize> {
        if !self.is_current_ticket(ticket) {
            return None;
        }
        self.reset_to_idle();
        self.current
    }

    pub fn pause(&mut self) -> Option<PauseOutcome> {
        match self.status {
            PlaybackStatus::Playing => {
                self.status = PlaybackStatus::Paused;
                Some(PauseOutcome::Paused)
            }
            PlaybackStatus::Paused => Some(PauseOutcome::AlreadyPaused),
            _ => None,
        }
    }

    /// Paused → Playing on the same source.
    pub fn resumed(&mut self) -> bool {
        if self.status != PlaybackStatus::Paused {
            return false;
        }
        self.status = PlaybackStatus::Playing;
        true
    }

    /// Whether a media event for `url` belongs to the live source.
    pub fn owns_source(&self, url: &str) -> bool {
        self.source_url.as_deref() == Some(url)
    }

    /// The live source finished; returns the finished index.
    pub fn ended(&mut self, url: &str) -> Option<usize> {
        if self.status != PlaybackStatus::Playing || !self.owns_source(url) {
            return None;
        }
        self.current
    }

    /// The live source failed after starting.
    pub fn media_failed(&mut self, url: &str) -> Option<usize> {
        if !self.owns_source(url) || !matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
            return None;
        }
        self.reset_to_idle();
        self.current
    }

    /// Stops without forgetting where the user was.
    pub fn stop(&mut self) {
        self.reset_to_idle();
    }

    /// The whole corpus has been traversed.
    pub fn finish_corpus(&mut self) {
        self.reset_to_idle();
        self.continuous = false;
        self.status = PlaybackStatus::Ended;
    }

    /// Switches edition. When an item is playing or paused, returns the index to
    /// restart under the new edition and whether it should stay paused.
    pub fn switch_edition(&mut self, edition: Edition) -> Option<(usize, bool)> {
        if edition == self.edition {
            return None;
        }
        self.edition = edition;
        let index = self.current?;
        match self.status {
            PlaybackStatus::Playing => Some((index, false)),
            PlaybackStatus::Paused => Some((index, true)),
            // A restart still loading keeps the status it was asked to settle in.
            PlaybackStatus::Loading => Some((index, self.hold_paused)),
            _ => None,
        }
    }

    fn reset_to_idle(&mut self) {
        self.status = PlaybackStatus::Idle;
        self.source_url = None;
        self.hold_paused = false;
        self.ticket += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PlaybackController {
        PlaybackController::new(Edition::default(), true)
    }

    #[test]
    fn start_moves_through_loading_to_playing() {
        let mut pc = controller();
        let plan = pc.begin(2, Edition::default(), "u/2".into(), false);
        assert_eq!(pc.status(), PlaybackStatus::Loading);
        assert_eq!(pc.started(plan.ticket), Some(PlaybackStatus::Playing));
        assert!(pc.is_playing(2));
        assert_eq!(pc.last_played(), Some(2));
    }

    #[test]
    fn newer_start_supersedes_older_ticket() {
        let mut pc = controller();
        let old = pc.begin(0, Edition::default(), "u/0".into(), false);
        let new = pc.begin(1, Edition::default(), "u/1".into(), false);
        assert_eq!(pc.started(old.ticket), None);
        assert_eq!(pc.start_failed(old.ticket), None);
        assert_eq!(pc.started(new.ticket), Some(PlaybackStatus::Playing));
        assert_eq!(pc.current(), Some(1));
    }

    #[test]
    fn failed_start_returns_to_idle() {
        let mut pc = controller();
        let plan = pc.begin(4, Edition::default(), "u/4".into(), false);
        assert_eq!(pc.start_failed(plan.ticket), Some(4));
        assert_eq!(pc.status(), PlaybackStatus::Idle);
        assert_eq!(pc.last_played(), Some(4));
    }

    #[test]
    fn pause_is_idempotent_and_rejected_when_idle() {
        let mut pc = controller();
        assert_eq!(pc.pause(), None);
        let plan = pc.begin(0, Edition::default(), "u/0".into(), false);
        pc.started(plan.ticket);
        assert_eq!(pc.pause(), Some(PauseOutcome::Paused));
        assert_eq!(pc.pause(), Some(PauseOutcome::AlreadyPaused));
        assert_eq!(pc.last_played(), Some(0));
        assert!(pc.resumed());
    }

    #[test]
    fn ended_only_counts_for_the_live_source() {
        let mut pc = controller();
        let plan = pc.begin(3, Edition::default(), "u/3".into(), false);
        assert_eq!(pc.ended("u/3"), None);
        pc.started(plan.ticket);
        assert_eq!(pc.ended("u/2"), None);
        assert_eq!(pc.ended("u/3"), Some(3));
    }

    #[test]
    fn edition_switch_preserves_pause() {
        let mut pc = controller();
        let plan = pc.begin(1, Edition::default(), "u/1".into(), false);
        pc.started(plan.ticket);
        pc.pause();
        assert_eq!(pc.switch_edition(Edition::new("ar.husary")), Some((1, true)));
        assert_eq!(pc.switch_edition(Edition::new("ar.husary")), None);

        let plan = pc.begin(1, Edition::new("ar.husary"), "h/1".into(), true);
        assert_eq!(pc.started(plan.ticket), Some(PlaybackStatus::Paused));
    }

    #[test]
    fn second_switch_during_a_paused_reload_stays_paused() {
        let mut pc = controller();
        let plan = pc.begin(1, Edition::default(), "u/1".into(), false);
        pc.started(plan.ticket);
        pc.pause();
        let (index, hold) = pc.switch_edition(Edition::new("ar.husary")).unwrap();
        pc.begin(index, Edition::new("ar.husary"), "h/1".into(), hold);
        assert_eq!(pc.status(), PlaybackStatus::Loading);

        assert_eq!(pc.switch_edition(Edition::new("ar.minshawi")), Some((1, true)));
    }

    #[test]
    fn corpus_end_is_terminal_and_drops_continuous() {
        let mut pc = controller();
        pc.set_continuous(true);
        pc.finish_corpus();
        assert_eq!(pc.status(), PlaybackStatus::Ended);
        assert!(!pc.continuous());
        assert_eq!(pc.ended("anything"), None);
    }

    #[test]
    fn speed_and_volume_are_clamped() {
        let mut pc = controller();
        assert_eq!(pc.set_speed(3.0), MAX_SPEED);
        assert_eq!(pc.set_speed(0.1), MIN_SPEED);
        assert_eq!(pc.set_volume(1.5), 1.0);
        assert_eq!(pc.set_volume(-1.0), 0.0);
    }
}
