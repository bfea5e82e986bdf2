//! crates/recitation_core/src/domain.rs
//!
//! Defines the pure, core data structures for the reader.
//! These structs are independent of any transport or storage format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The audio edition used when the caller has not picked one.
pub const DEFAULT_AUDIO_EDITION: &str = "ar.alafasy";

/// The text edition used to load item text.
pub const DEFAULT_TEXT_EDITION: &str = "quran-uthmani";

//=========================================================================================
// Identifiers
//=========================================================================================

/// Identifies one numbered container (chapter) of the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub u32);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend identifier of a single item (verse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named audio reciter or text variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edition(pub String);

impl Edition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Edition {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_EDITION)
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// Corpus
//=========================================================================================

/// One unit of recitation and reading. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// 1-based position inside its container.
    pub position: u32,
    /// 1-based position across the whole corpus; keys the audio resource.
    pub global_number: u32,
    pub text: String,
    pub translation: Option<String>,
}

/// One chapter of the corpus with its ordered items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub english_name: String,
    pub items: Vec<Item>,
}

impl Container {
    pub fn total_items(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn item_ref(&self, index: usize) -> Option<ItemRef> {
        self.items.get(index).map(|item| ItemRef {
            item_id: item.id,
            container: self.id,
            position: item.position,
        })
    }
}

/// Addresses one item the way every backend write expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: ItemId,
    pub container: ContainerId,
    pub position: u32,
}

/// Answer to "what comes after (container, position) in corpus order".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextItem {
    Item {
        item_id: ItemId,
        container: ContainerId,
        position: u32,
        global_number: u32,
    },
    /// The given position was the final item of the corpus.
    Last,
}

//=========================================================================================
// Playback
//=========================================================================================

/// The playback state machine: `Idle → Loading → Playing ⇄ Paused`, with `Ended`
/// reserved for a continuous traversal that ran out of corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
}

/// Reported by the media element once a source stops producing sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Ended { url: String },
    Failed { url: String, reason: String },
}

//=========================================================================================
// Progress
//=========================================================================================

/// The "last read position" record for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPosition {
    pub container: ContainerId,
    pub item_id: ItemId,
    pub position: u32,
}

/// Completion statistics for a single container as the backend reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub total_items: u32,
    pub completed_count: u32,
    pub completion_percentage: f64,
    pub first_unread: Option<u32>,
    pub completed_positions: Vec<u32>,
}

/// The gap-aware "true progress" snapshot across the whole corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialProgress {
    pub sequential_count: u32,
    pub sequential_percentage: f64,
    /// Absent once every item in the corpus is complete.
    pub first_incomplete_container: Option<ContainerId>,
    pub first_incomplete_position: Option<u32>,
    pub is_complete: bool,
}

//=========================================================================================
// Analytics
//=========================================================================================

/// Payload for opening a listening-analytics session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningStart {
    pub item: ItemRef,
    pub edition: Edition,
}

/// One open listening interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSession {
    pub id: Uuid,
    pub item: ItemRef,
    pub edition: Edition,
    pub started_at: DateTime<Utc>,
}

/// Returned when a whole-corpus session is opened: where the traversal should begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSessionStart {
    pub session_id: Uuid,
    pub start_container: ContainerId,
    pub start_position: u32,
}

//=========================================================================================
// Bookmarks and deferred intents
//=========================================================================================

pub type BookmarkId = Uuid;

/// The auth-gated intents that can wait for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingIntent {
    Bookmark,
}

/// An auth-gated action attempted while signed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub item: ItemRef,
    pub intent: PendingIntent,
    pub created_at: DateTime<Utc>,
}

/// Token handed from one container view to the next across a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMarker {
    pub target: ContainerId,
    pub continuous: bool,
    pub corpus_session: Option<Uuid>,
}
