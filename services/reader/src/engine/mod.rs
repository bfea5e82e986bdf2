//! services/reader/src/engine/mod.rs
//!
//! The recitation playback and progress-tracking engine. One `ReaderSession` is
//! mounted per container view; it owns every component below and processes its
//! inbox serially.

pub mod analytics;
pub mod completion_store;
pub mod corpus;
pub mod navigator;
pub mod observer;
pub mod pending;
pub mod persister;
pub mod playback;
pub mod prefetch;
pub mod protocol;
pub mod session;
pub mod timers;

use recitation_core::domain::ContainerId;
use recitation_core::ports::{
    AnalyticsService, AudioFetcher, BookmarkService, ClientStore, CorpusService, MediaElement,
    PortError, ProgressService,
};
use std::sync::Arc;
use std::time::Duration;

pub use protocol::{Command, Notification, ReaderHandle};
pub use session::ReaderSession;

/// Keys of the persisted client-side markers.
pub mod keys {
    pub const AUTH_TOKEN: &str = "reader.auth_token";
    pub const PASSIVE_TRACKING: &str = "reader.passive_tracking";
    pub const RESUME_MARKER: &str = "reader.resume_marker";
}

/// Errors surfaced to whoever drives a session.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Index {index} is outside the container ({len} items)")]
    InvalidIndex { index: usize, len: usize },
    #[error("Nothing is playing")]
    NotPlaying,
    #[error("Nothing to resume")]
    NothingToResume,
    #[error("Container {container} has no item at position {position}")]
    UnknownPosition { container: ContainerId, position: u32 },
    #[error("The session has been unmounted")]
    Unmounted,
    #[error("Port error: {0}")]
    Port(#[from] PortError),
}

/// Tunables for one session.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub audio_edition: String,
    pub text_edition: String,
    pub translation: Option<String>,
    pub persist_debounce: Duration,
    pub dwell: Duration,
    pub prefetch_settle: Duration,
    pub prefetch_depth: usize,
    pub auto_advance: bool,
    pub visibility_threshold: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            audio_edition: recitation_core::domain::DEFAULT_AUDIO_EDITION.to_string(),
            text_edition: recitation_core::domain::DEFAULT_TEXT_EDITION.to_string(),
            translation: None,
            persist_debounce: Duration::from_secs(2),
            dwell: Duration::from_secs(2),
            prefetch_settle: Duration::from_millis(500),
            prefetch_depth: 2,
            auto_advance: true,
            visibility_threshold: 0.1,
        }
    }
}

/// Every collaborator a session talks to, created once and shared across mounts.
#[derive(Clone)]
pub struct ReaderDeps {
    pub corpus: Arc<dyn CorpusService>,
    pub progress: Arc<dyn ProgressService>,
    pub analytics: Arc<dyn AnalyticsService>,
    pub bookmarks: Arc<dyn BookmarkService>,
    pub fetcher: Arc<dyn AudioFetcher>,
    pub media: Arc<dyn MediaElement>,
    pub store: Arc<dyn ClientStore>,
}
