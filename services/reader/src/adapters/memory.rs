//! services/reader/src/adapters/memory.rs
//!
//! A complete backend held in process memory. It implements every backend port
//! over a fixed corpus, records each call it receives and can be told to fail
//! specific operations. Sessions run against it in tests and offline demos.

use async_trait::async_trait;
use bytes::Bytes;
use recitation_core::completion::completion_percentage;
use recitation_core::domain::{
    BookmarkId, CompletionStats, Container, ContainerId, CorpusSessionStart, Edition, Item, ItemId,
    ItemRef, LastPosition, ListeningStart, NextItem, SequentialProgress,
};
use recitation_core::ports::{
    AnalyticsService, AudioFetcher, BookmarkService, CorpusService, PortError, PortResult,
    ProgressService,
};
use recitation_core::sequential::{first_incomplete, sequential_prefix_len, CorpusCompletions};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    LoadContainer,
    NextItem,
    UpsertLastPosition,
    MarkComplete,
    MarkBatch,
    CompletionStats,
    ClearContainer,
    ValidateSequential,
    StartListening,
    EndListening,
    StartCorpusSession,
    EndCorpusSession,
    CreateBookmark,
    DeleteBookmark,
    Fetch,
}

/// One call as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    LoadContainer(ContainerId),
    NextItem { container: ContainerId, position: u32 },
    UpsertLastPosition(LastPosition),
    MarkComplete(ItemRef),
    MarkBatch { container: ContainerId, positions: Vec<u32> },
    CompletionStats(ContainerId),
    ClearContainer(ContainerId),
    ValidateSequential,
    SequentialProgress,
    StartListening(ListeningStart),
    EndListening { session: Uuid, duration_secs: u64 },
    StartCorpusSession,
    EndCorpusSession(Uuid),
    CreateBookmark(ItemRef),
    DeleteBookmark(BookmarkId),
    BookmarksForContainer(ContainerId),
    Fetch(String),
}

#[derive(Default)]
struct BackendState {
    completions: CorpusCompletions,
    last_positions: HashMap<ContainerId, LastPosition>,
    bookmarks: HashMap<ItemId, BookmarkId>,
    open_listening: HashSet<Uuid>,
    open_corpus_sessions: HashSet<Uuid>,
    failures: HashSet<Operation>,
    partial_loads: HashMap<ContainerId, usize>,
    calls: Vec<BackendCall>,
}

pub struct InMemoryBackend {
    audio_base: String,
    corpus: Vec<Container>,
    state: Mutex<BackendState>,
}

impl InMemoryBackend {
    /// `corpus` must be in corpus order.
    pub fn new(corpus: Vec<Container>) -> Self {
        Self {
            audio_base: "memory://audio".to_string(),
            corpus,
            state: Mutex::new(BackendState::default()),
        }
    }

    /// A corpus of numbered containers with `sizes[i]` items each, globally
    /// numbered in order.
    pub fn with_layout(sizes: &[u32]) -> Self {
        let mut global = 0;
        let corpus = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let id = i as u32 + 1;
                Container {
                    id: ContainerId(id),
                    name: format!("Container {}", id),
                    english_name: format!("Container {}", id),
                    items: (1..=size)
                        .map(|position| {
                            global += 1;
                            Item {
                                id: ItemId(global),
                                position,
                                global_number: global,
                                text: format!("{}:{}", id, position),
                                translation: None,
                            }
                        })
                        .collect(),
                }
            })
            .collect();
        Self::new(corpus)
    }

    //=====================================================================================
    // Test Controls & Inspection
    //=====================================================================================

    pub fn fail(&self, operation: Operation) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(operation);
        }
    }

    /// Serves only the first `items` of `container` from `load_container`, so the
    /// client's copy lags behind the corpus order used by `next_item`.
    pub fn serve_partial(&self, container: ContainerId, items: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.partial_loads.insert(container, items);
        }
    }

    pub fn recover(&self, operation: Operation) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.remove(&operation);
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Seeds completions as if they had been written earlier.
    pub fn complete(&self, container: ContainerId, positions: &[u32]) {
        if let Ok(mut state) = self.state.lock() {
            state
                .completions
                .entry(container)
                .or_default()
                .extend(positions.iter().copied());
        }
    }

    pub fn completed(&self, container: ContainerId) -> Vec<u32> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.completions.get(&container).cloned())
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn last_position(&self, container: ContainerId) -> Option<LastPosition> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.last_positions.get(&container).copied())
    }

    pub fn open_listening_sessions(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.open_listening.len())
            .unwrap_or_default()
    }

    pub fn open_corpus_sessions(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.open_corpus_sessions.len())
            .unwrap_or_default()
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    fn state(&self) -> PortResult<MutexGuard<'_, BackendState>> {
        self.state
            .lock()
            .map_err(|_| PortError::Unexpected("in-memory backend lock poisoned".to_string()))
    }

    /// Records `call`, then fails it if `operation` was marked failing.
    fn enter(&self, operation: Operation, call: BackendCall) -> PortResult<MutexGuard<'_, BackendState>> {
        let mut state = self.state()?;
        state.calls.push(call);
        if state.failures.contains(&operation) {
            return Err(PortError::Unexpected(format!("{:?} failed", operation)));
        }
        Ok(state)
    }

    fn container(&self, id: ContainerId) -> PortResult<&Container> {
        self.corpus
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Container {} not found", id)))
    }

    fn layout(&self) -> Vec<(ContainerId, u32)> {
        self.corpus.iter().map(|c| (c.id, c.total_items())).collect()
    }

    fn corpus_len(&self) -> u32 {
        self.corpus.iter().map(Container::total_items).sum()
    }
}

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl CorpusService for InMemoryBackend {
    async fn load_container(
        &self,
        container: ContainerId,
        _text_edition: &str,
        _translation: Option<&str>,
    ) -> PortResult<Container> {
        let state = self.enter(Operation::LoadContainer, BackendCall::LoadContainer(container))?;
        let partial = state.partial_loads.get(&container).copied();
        drop(state);
        let mut loaded = self.container(container).cloned()?;
        if let Some(items) = partial {
            loaded.items.truncate(items);
        }
        Ok(loaded)
    }

    async fn next_item(&self, container: ContainerId, position: u32) -> PortResult<NextItem> {
        drop(self.enter(
            Operation::NextItem,
            BackendCall::NextItem { container, position },
        )?);
        let index = self
            .corpus
            .iter()
            .position(|c| c.id == container)
            .ok_or_else(|| PortError::NotFound(format!("Container {} not found", container)))?;

        let next = self.corpus[index]
            .items
            .iter()
            .find(|item| item.position == position + 1)
            .map(|item| (container, item))
            .or_else(|| {
                self.corpus[index + 1..]
                    .iter()
                    .find_map(|c| c.items.first().map(|item| (c.id, item)))
            });

        Ok(match next {
            Some((container, item)) => NextItem::Item {
                item_id: item.id,
                container,
                position: item.position,
                global_number: item.global_number,
            },
            None => NextItem::Last,
        })
    }

    fn audio_url(&self, edition: &Edition, global_number: u32) -> String {
        format!("{}/{}/{}.mp3", self.audio_base, edition, global_number)
    }
}

#[async_trait]
impl ProgressService for InMemoryBackend {
    async fn upsert_last_position(&self, position: LastPosition) -> PortResult<()> {
        let mut state = self.enter(
            Operation::UpsertLastPosition,
            BackendCall::UpsertLastPosition(position),
        )?;
        state.last_positions.insert(position.container, position);
        Ok(())
    }

    async fn mark_complete(&self, item: ItemRef) -> PortResult<()> {
        let mut state = self.enter(Operation::MarkComplete, BackendCall::MarkComplete(item))?;
        state
            .completions
            .entry(item.container)
            .or_default()
            .insert(item.position);
        Ok(())
    }

    async fn mark_batch_complete(&self, container: ContainerId, items: &[ItemRef]) -> PortResult<()> {
        let positions: Vec<u32> = items.iter().map(|item| item.position).collect();
        let mut state = self.enter(
            Operation::MarkBatch,
            BackendCall::MarkBatch {
                container,
                positions: positions.clone(),
            },
        )?;
        state
            .completions
            .entry(container)
            .or_default()
            .extend(positions);
        Ok(())
    }

    async fn completion_stats(&self, container: ContainerId) -> PortResult<CompletionStats> {
        let state = self.enter(
            Operation::CompletionStats,
            BackendCall::CompletionStats(container),
        )?;
        let total = self.container(container)?.total_items();
        let completed: Vec<u32> = state
            .completions
            .get(&container)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let count = completed.len() as u32;
        Ok(CompletionStats {
            total_items: total,
            completed_count: count,
            completion_percentage: f64::from(completion_percentage(count, total)),
            first_unread: (1..=total).find(|p| !completed.contains(p)),
            completed_positions: completed,
        })
    }

    async fn clear_container(&self, container: ContainerId) -> PortResult<()> {
        let mut state = self.enter(
            Operation::ClearContainer,
            BackendCall::ClearContainer(container),
        )?;
        state.completions.remove(&container);
        Ok(())
    }

    async fn validate_sequential(&self) -> PortResult<()> {
        drop(self.enter(Operation::ValidateSequential, BackendCall::ValidateSequential)?);
        Ok(())
    }

    async fn sequential_progress(&self) -> PortResult<SequentialProgress> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::SequentialProgress);
        let layout = self.layout();
        let count = sequential_prefix_len(&layout, &state.completions);
        let first = first_incomplete(&layout, &state.completions);
        Ok(SequentialProgress {
            sequential_count: count,
            sequential_percentage: f64::from(completion_percentage(count, self.corpus_len())),
            first_incomplete_container: first.map(|(c, _)| c),
            first_incomplete_position: first.map(|(_, p)| p),
            is_complete: first.is_none(),
        })
    }
}

#[async_trait]
impl AnalyticsService for InMemoryBackend {
    async fn start_listening(&self, start: &ListeningStart) -> PortResult<Uuid> {
        let mut state = self.enter(
            Operation::StartListening,
            BackendCall::StartListening(start.clone()),
        )?;
        let id = Uuid::new_v4();
        state.open_listening.insert(id);
        Ok(id)
    }

    async fn end_listening(&self, session: Uuid, duration_secs: u64) -> PortResult<()> {
        let mut state = self.enter(
            Operation::EndListening,
            BackendCall::EndListening {
                session,
                duration_secs,
            },
        )?;
        if !state.open_listening.remove(&session) {
            return Err(PortError::NotFound(format!("Listening session {} not open", session)));
        }
        Ok(())
    }

    async fn start_corpus_session(&self) -> PortResult<CorpusSessionStart> {
        let mut state = self.enter(Operation::StartCorpusSession, BackendCall::StartCorpusSession)?;
        let layout = self.layout();
        let (start_container, start_position) = first_incomplete(&layout, &state.completions)
            .or_else(|| layout.first().map(|(c, _)| (*c, 1)))
            .ok_or_else(|| PortError::NotFound("The corpus is empty".to_string()))?;
        let session_id = Uuid::new_v4();
        state.open_corpus_sessions.insert(session_id);
        Ok(CorpusSessionStart {
            session_id,
            start_container,
            start_position,
        })
    }

    async fn end_corpus_session(&self, session: Uuid) -> PortResult<()> {
        let mut state = self.enter(
            Operation::EndCorpusSession,
            BackendCall::EndCorpusSession(session),
        )?;
        state.open_corpus_sessions.remove(&session);
        Ok(())
    }
}

#[async_trait]
impl BookmarkService for InMemoryBackend {
    async fn create_bookmark(&self, item: ItemRef) -> PortResult<Option<BookmarkId>> {
        let mut state = self.enter(Operation::CreateBookmark, BackendCall::CreateBookmark(item))?;
        if state.bookmarks.contains_key(&item.item_id) {
            return Ok(None);
        }
        let id = Uuid::new_v4();
        state.bookmarks.insert(item.item_id, id);
        Ok(Some(id))
    }

    async fn delete_bookmark(&self, bookmark: BookmarkId) -> PortResult<()> {
        let mut state = self.enter(
            Operation::DeleteBookmark,
            BackendCall::DeleteBookmark(bookmark),
        )?;
        state.bookmarks.retain(|_, id| *id != bookmark);
        Ok(())
    }

    async fn bookmarks_for_container(
        &self,
        container: ContainerId,
    ) -> PortResult<HashMap<ItemId, BookmarkId>> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::BookmarksForContainer(container));
        let items: HashSet<ItemId> = self.container(container)?.items.iter().map(|i| i.id).collect();
        Ok(state
            .bookmarks
            .iter()
            .filter(|(item, _)| items.contains(item))
            .map(|(item, id)| (*item, *id))
            .collect())
    }
}

#[async_trait]
impl AudioFetcher for InMemoryBackend {
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        drop(self.enter(Operation::Fetch, BackendCall::Fetch(url.to_string()))?);
        Ok(Bytes::from(format!("audio:{}", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn next_item_walks_across_containers() {
        let backend = InMemoryBackend::with_layout(&[2, 1]);
        let next = backend.next_item(ContainerId(1), 1).await.unwrap();
        assert!(matches!(next, NextItem::Item { container: ContainerId(1), position: 2, .. }));
        let next = backend.next_item(ContainerId(1), 2).await.unwrap();
        assert!(matches!(
            next,
            NextItem::Item { container: ContainerId(2), position: 1, global_number: 3, .. }
        ));
        assert_eq!(backend.next_item(ContainerId(2), 1).await.unwrap(), NextItem::Last);
    }

    #[tokio::test]
    async fn sequential_progress_stops_at_the_first_gap() {
        let backend = InMemoryBackend::with_layout(&[6, 4]);
        backend.complete(ContainerId(1), &[1, 2, 3, 5]);
        let progress = backend.sequential_progress().await.unwrap();
        assert_eq!(progress.sequential_count, 3);
        assert_eq!(progress.first_incomplete_container, Some(ContainerId(1)));
        assert_eq!(progress.first_incomplete_position, Some(4));
        assert!(!progress.is_complete);
    }

    #[tokio::test]
    async fn complete_corpus_has_no_first_incomplete_item() {
        let backend = InMemoryBackend::with_layout(&[2, 1]);
        backend.complete(ContainerId(1), &[1, 2]);
        backend.complete(ContainerId(2), &[1]);
        let progress = backend.sequential_progress().await.unwrap();
        assert_eq!(progress.sequential_count, 3);
        assert_eq!(progress.first_incomplete_container, None);
        assert_eq!(progress.first_incomplete_position, None);
        assert!(progress.is_complete);
    }

    #[tokio::test]
    async fn corpus_session_starts_at_first_incomplete() {
        let backend = InMemoryBackend::with_layout(&[2, 3]);
        backend.complete(ContainerId(1), &[1, 2]);
        let start = backend.start_corpus_session().await.unwrap();
        assert_eq!(start.start_container, ContainerId(2));
        assert_eq!(start.start_position, 1);
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_recoverable() {
        let backend = InMemoryBackend::with_layout(&[3]);
        backend.fail(Operation::ClearContainer);
        assert!(backend.clear_container(ContainerId(1)).await.is_err());
        backend.recover(Operation::ClearContainer);
        assert!(backend.clear_container(ContainerId(1)).await.is_ok());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::ClearContainer(ContainerId(1)),
                BackendCall::ClearContainer(ContainerId(1))
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_bookmark_reports_none() {
        let backend = InMemoryBackend::with_layout(&[3]);
        let item = ItemRef {
            item_id: ItemId(2),
            container: ContainerId(1),
            position: 2,
        };
        assert!(backend.create_bookmark(item).await.unwrap().is_some());
        assert!(backend.create_bookmark(item).await.unwrap().is_none());
        assert_eq!(backend.bookmarks_for_container(ContainerId(1)).await.unwrap().len(), 1);
    }
}
