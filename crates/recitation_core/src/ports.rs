//! crates/recitation_core/src/ports.rs
//!
//! Defines the service contracts (traits) the reader engine depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the engine
//! independent of the concrete backend, media output and client-side storage.

use crate::domain::{
    BookmarkId, CompletionStats, Container, ContainerId, CorpusSessionStart, Edition, ItemId,
    ItemRef, LastPosition, ListeningStart, NextItem, SequentialProgress,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (network, audio, disk).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Backend Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait CorpusService: Send + Sync {
    /// Loads a container with its items in order, optionally with a translation.
    async fn load_container(
        &self,
        container: ContainerId,
        text_edition: &str,
        translation: Option<&str>,
    ) -> PortResult<Container>;

    /// The next item in whole-corpus order after (container, position).
    async fn next_item(&self, container: ContainerId, position: u32) -> PortResult<NextItem>;

    /// Stable address of the audio for one item under one edition.
    fn audio_url(&self, edition: &Edition, global_number: u32) -> String;
}

#[async_trait]
pub trait ProgressService: Send + Sync {
    async fn upsert_last_position(&self, position: LastPosition) -> PortResult<()>;

    async fn mark_complete(&self, item: ItemRef) -> PortResult<()>;

    async fn mark_batch_complete(&self, container: ContainerId, items: &[ItemRef]) -> PortResult<()>;

    async fn completion_stats(&self, container: ContainerId) -> PortResult<CompletionStats>;

    async fn clear_container(&self, container: ContainerId) -> PortResult<()>;

    /// Asks the backend to recompute which completions are sequential.
    async fn validate_sequential(&self) -> PortResult<()>;

    async fn sequential_progress(&self) -> PortResult<SequentialProgress>;
}

#[async_trait]
pub trait AnalyticsService: Send + Sync {
    async fn start_listening(&self, start: &ListeningStart) -> PortResult<Uuid>;

    async fn end_listening(&self, session: Uuid, duration_secs: u64) -> PortResult<()>;

    /// Opens a whole-corpus traversal, returning where it should begin.
    async fn start_corpus_session(&self) -> PortResult<CorpusSessionStart>;

    async fn end_corpus_session(&self, session: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait BookmarkService: Send + Sync {
    /// Creates a bookmark; `None` when the backend already had one.
    async fn create_bookmark(&self, item: ItemRef) -> PortResult<Option<BookmarkId>>;

    async fn delete_bookmark(&self, bookmark: BookmarkId) -> PortResult<()>;

    async fn bookmarks_for_container(
        &self,
        container: ContainerId,
    ) -> PortResult<HashMap<ItemId, BookmarkId>>;
}

//=========================================================================================
// Media Ports
//=========================================================================================

/// A playable resource, optionally already downloaded by the prefetcher.
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub url: String,
    pub preloaded: Option<Bytes>,
}

#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Downloads the full resource behind `url`.
    async fn fetch(&self, url: &str) -> PortResult<Bytes>;
}

/// The single media element. Completion and failure after a successful start are
/// reported out of band as `MediaEvent`s tagged with the source URL.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Points the element at a new source, superseding the previous one, and
    /// resolves once it can play.
    async fn load(&self, source: MediaSource) -> PortResult<()>;

    async fn play(&self) -> PortResult<()>;

    fn pause(&self);

    fn stop(&self);

    fn set_rate(&self, rate: f32);

    fn set_volume(&self, volume: f32);
}

//=========================================================================================
// Client-side Storage Port
//=========================================================================================

/// Simple persisted key/value state kept on the client.
pub trait ClientStore: Send + Sync {
    fn get(&self, key: &str) -> PortResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> PortResult<()>;

    fn remove(&self, key: &str) -> PortResult<()>;
}
