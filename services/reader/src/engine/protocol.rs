//! services/reader/src/engine/protocol.rs
//!
//! Defines the messages flowing into a session (commands from the view, media
//! events, results of its own background calls) and the notifications it emits.

use super::observer::VisibilitySample;
use super::playback::StartTicket;
use super::analytics::OpenTicket;
use bytes::Bytes;
use recitation_core::completion::DeltaId;
use recitation_core::domain::{
    ContainerId, Edition, ItemId, MediaEvent, PlaybackStatus, SequentialProgress,
};
use recitation_core::ports::PortResult;
use tokio::sync::mpsc;
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the View TO the Session
//=========================================================================================

/// User intents, processed one at a time in arrival order.
#[derive(Debug, Clone)]
pub enum Command {
    Play { index: usize, edition: Option<Edition> },
    Pause,
    Resume,
    Toggle { index: usize },
    SetEdition(Edition),
    SetSpeed(f32),
    SetVolume(f32),
    SetContinuous(bool),
    SetAutoAdvance(bool),
    /// Opens a whole-corpus traversal from the first incomplete item.
    StartContinuous,
    SetPassiveTracking(bool),
    ReportVisibility(Vec<VisibilitySample>),
    Bookmark { index: usize },
    Authenticated { token: String },
    ClearProgress,
    Unmount,
}

//=========================================================================================
// Messages Sent FROM the Session TO the View
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged {
        status: PlaybackStatus,
        index: Option<usize>,
    },
    /// A start attempt failed; the session is back to `Idle`.
    PlaybackFailed { index: usize, message: String },
    /// Auto-advance ran past the last item of the container.
    ContainerFinished { container: ContainerId },
    /// Continuous mode exhausted the corpus.
    CorpusFinished,
    /// The host should mount `container`; a resume marker is waiting for it.
    Navigate { container: ContainerId },
    /// An auth-gated action was parked until the user signs in.
    LoginRequired { item: ItemId },
    CompletionChanged {
        completed_count: u32,
        percentage: u32,
        first_gap: Option<u32>,
    },
    SequentialChanged(SequentialProgress),
    BookmarkChanged { item: ItemId, bookmarked: bool },
    /// A transient, non-blocking error message.
    Error { message: String },
}

//=========================================================================================
// Internal Messages (results of the session's own background work)
//=========================================================================================

#[derive(Debug)]
pub(crate) enum Internal {
    MediaStarted {
        ticket: StartTicket,
        result: PortResult<()>,
    },
    ListeningOpened {
        ticket: OpenTicket,
        result: PortResult<Uuid>,
    },
    CompletionSettled {
        delta: DeltaId,
        result: PortResult<()>,
    },
    SequentialRefreshed(PortResult<SequentialProgress>),
    Prefetched {
        edition: Edition,
        url: String,
        result: PortResult<Bytes>,
    },
}

#[derive(Debug)]
pub(crate) enum Envelope {
    Command(Command),
    Media(MediaEvent),
    Internal(Internal),
}

//=========================================================================================
// ReaderHandle
//=========================================================================================

/// Cloneable sender side of a session's inbox. Sends after unmount are dropped.
#[derive(Clone, Debug)]
pub struct ReaderHandle {
    pub(crate) tx: mpsc::UnboundedSender<Envelope>,
}

impl ReaderHandle {
    pub fn send(&self, command: Command) {
        let _ = self.tx.send(Envelope::Command(command));
    }

    /// Entry point for the media element's out-of-band events.
    pub fn media_event(&self, event: MediaEvent) {
        let _ = self.tx.send(Envelope::Media(event));
    }

    pub fn play(&self, index: usize) {
        self.send(Command::Play {
            index,
            edition: None,
        });
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn toggle(&self, index: usize) {
        self.send(Command::Toggle { index });
    }

    pub fn unmount(&self) {
        self.send(Command::Unmount);
    }
}
