//! services/reader/src/adapters/http.rs
//!
//! The adapter for the recitation backend's REST API. It implements every
//! backend port plus the audio fetcher with one shared `reqwest` client. The
//! bearer token is read from the client store on each request, so signing in
//! takes effect without rebuilding the adapter.

use crate::engine::keys;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{try_join, try_join_all};
use recitation_core::domain::{
    BookmarkId, CompletionStats, Container, ContainerId, CorpusSessionStart, Edition, Item, ItemId,
    ItemRef, LastPosition, ListeningStart, NextItem, SequentialProgress,
};
use recitation_core::ports::{
    AnalyticsService, AudioFetcher, BookmarkService, ClientStore, CorpusService, PortError,
    PortResult, ProgressService,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    api_url: String,
    audio_url: String,
    store: Arc<dyn ClientStore>,
}

impl HttpBackend {
    pub fn new(
        api_url: impl Into<String>,
        audio_url: impl Into<String>,
        store: Arc<dyn ClientStore>,
    ) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            audio_url: audio_url.into().trim_end_matches('/').to_string(),
            store,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Attaches the bearer token when the user is signed in.
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.store.get(keys::AUTH_TOKEN) {
            Ok(Some(token)) if !token.is_empty() => request.bearer_auth(token),
            Ok(_) => request,
            Err(e) => {
                warn!("Could not read auth token: {}", e);
                request
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> PortResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PortError::Unauthorized),
            StatusCode::NOT_FOUND => Err(PortError::NotFound(response.url().path().to_string())),
            status => Err(PortError::Unexpected(format!(
                "{} returned {}",
                response.url().path(),
                status
            ))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> PortResult<T> {
        let response = self
            .send(self.client.get(self.endpoint(path)).query(query))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> PortResult<T> {
        let response = self
            .send(self.client.post(self.endpoint(path)).json(body))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }

    async fn load_items(&self, container: ContainerId, edition: &str) -> PortResult<Vec<ItemRecord>> {
        self.get_json(
            &format!("/api/quran/surahs/{}/ayahs", container),
            &[("edition", edition)],
        )
        .await
    }
}

//=========================================================================================
// Wire Record Structs
//=========================================================================================

#[derive(Deserialize)]
struct ContainerRecord {
    id: u32,
    name: String,
    english_name: String,
}

#[derive(Deserialize)]
struct ItemRecord {
    id: u32,
    number: u32,
    number_in_surah: u32,
    text: String,
}
impl ItemRecord {
    fn to_domain(self, translation: Option<String>) -> Item {
        Item {
            id: ItemId(self.id),
            position: self.number_in_surah,
            global_number: self.number,
            text: self.text,
            translation,
        }
    }
}

#[derive(Deserialize)]
struct NextItemRecord {
    #[serde(default)]
    is_last: bool,
    ayah_number: Option<u32>,
    surah_id: Option<u32>,
    ayah_id: Option<u32>,
    number_in_surah: Option<u32>,
}
impl NextItemRecord {
    fn to_domain(self) -> PortResult<NextItem> {
        if self.is_last {
            return Ok(NextItem::Last);
        }
        match (self.ayah_id, self.surah_id, self.number_in_surah, self.ayah_number) {
            (Some(item), Some(container), Some(position), Some(global)) => Ok(NextItem::Item {
                item_id: ItemId(item),
                container: ContainerId(container),
                position,
                global_number: global,
            }),
            _ => Err(PortError::Unexpected(
                "next-item response is missing fields".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct StatsRecord {
    total_ayahs: u32,
    completed_count: u32,
    completion_percentage: f64,
    first_unread_ayah: Option<u32>,
    #[serde(default)]
    completed_ayah_numbers: Vec<u32>,
}
impl StatsRecord {
    fn to_domain(self) -> CompletionStats {
        CompletionStats {
            total_items: self.total_ayahs,
            completed_count: self.completed_count,
            completion_percentage: self.completion_percentage,
            first_unread: self.first_unread_ayah,
            completed_positions: self.completed_ayah_numbers,
        }
    }
}

#[derive(Deserialize)]
struct SequentialRecord {
    sequential_completion_count: u32,
    sequential_percentage: f64,
    first_incomplete_ayah: Option<u32>,
    first_incomplete_surah: Option<u32>,
    is_complete: bool,
}
impl SequentialRecord {
    fn to_domain(self) -> SequentialProgress {
        SequentialProgress {
            sequential_count: self.sequential_completion_count,
            sequential_percentage: self.sequential_percentage,
            first_incomplete_container: self.first_incomplete_surah.map(ContainerId),
            first_incomplete_position: self.first_incomplete_ayah,
            is_complete: self.is_complete,
        }
    }
}

#[derive(Deserialize)]
struct SessionRecord {
    session_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct CorpusStartRecord {
    session_id: Option<Uuid>,
    start_surah: u32,
    start_ayah: u32,
}

#[derive(Deserialize)]
struct BookmarkCreatedRecord {
    id: Option<Uuid>,
}

#[derive(Deserialize)]
struct Ignored {}

#[derive(Serialize)]
struct ItemBody {
    surah_id: u32,
    ayah_id: u32,
    ayah_number: u32,
}
impl From<ItemRef> for ItemBody {
    fn from(item: ItemRef) -> Self {
        Self {
            surah_id: item.container.0,
            ayah_id: item.item_id.0,
            ayah_number: item.position,
        }
    }
}

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl CorpusService for HttpBackend {
    async fn load_container(
        &self,
        container: ContainerId,
        text_edition: &str,
        translation: Option<&str>,
    ) -> PortResult<Container> {
        let header_path = format!("/api/quran/surahs/{}", container);
        let (header, items) = try_join(
            self.get_json::<ContainerRecord>(&header_path, &[("edition", text_edition)]),
            self.load_items(container, text_edition),
        )
        .await?;

        let mut translations: HashMap<u32, String> = match translation {
            Some(edition) => match self.load_items(container, edition).await {
                Ok(rows) => rows.into_iter().map(|r| (r.number_in_surah, r.text)).collect(),
                Err(e) => {
                    warn!("Translation {} unavailable for container {}: {}", edition, container, e);
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        debug!(count = items.len(), "Loaded container {}", container);
        Ok(Container {
            id: ContainerId(header.id),
            name: header.name,
            english_name: header.english_name,
            items: items
                .into_iter()
                .map(|record| {
                    let translated = translations.remove(&record.number_in_surah);
                    record.to_domain(translated)
                })
                .collect(),
        })
    }

    async fn next_item(&self, container: ContainerId, position: u32) -> PortResult<NextItem> {
        let record: NextItemRecord = self
            .get_json(
                &format!("/api/quran-play/next-ayah/{}/{}", container, position),
                &[],
            )
            .await?;
        record.to_domain()
    }

    fn audio_url(&self, edition: &Edition, global_number: u32) -> String {
        format!("{}/{}/{}.mp3", self.audio_url, edition, global_number)
    }
}

#[async_trait]
impl ProgressService for HttpBackend {
    async fn upsert_last_position(&self, position: LastPosition) -> PortResult<()> {
        let body = ItemBody {
            surah_id: position.container.0,
            ayah_id: position.item_id.0,
            ayah_number: position.position,
        };
        self.post_json::<_, Ignored>("/api/progress", &body).await?;
        Ok(())
    }

    async fn mark_complete(&self, item: ItemRef) -> PortResult<()> {
        self.post_json::<_, Ignored>("/api/completed-ayahs", &ItemBody::from(item))
            .await?;
        Ok(())
    }

    /// The backend ignores duplicates, so a batch is the single writes issued together.
    async fn mark_batch_complete(&self, container: ContainerId, items: &[ItemRef]) -> PortResult<()> {
        debug!(count = items.len(), "Marking batch complete in container {}", container);
        try_join_all(items.iter().map(|item| self.mark_complete(*item))).await?;
        Ok(())
    }

    async fn completion_stats(&self, container: ContainerId) -> PortResult<CompletionStats> {
        let record: StatsRecord = self
            .get_json(&format!("/api/completed-ayahs/stats/{}", container), &[])
            .await?;
        Ok(record.to_domain())
    }

    async fn clear_container(&self, container: ContainerId) -> PortResult<()> {
        self.send(
            self.client
                .delete(self.endpoint(&format!("/api/completed-ayahs/surah/{}", container))),
        )
        .await?;
        Ok(())
    }

    async fn validate_sequential(&self) -> PortResult<()> {
        self.send(self.client.post(self.endpoint("/api/progress/validate-sequential")))
            .await?;
        Ok(())
    }

    async fn sequential_progress(&self) -> PortResult<SequentialProgress> {
        let record: SequentialRecord = self.get_json("/api/progress/sequential", &[]).await?;
        Ok(record.to_domain())
    }
}

#[derive(Serialize)]
struct PlayStartBody<'a> {
    ayah_id: u32,
    surah_id: u32,
    ayah_number: u32,
    audio_edition: &'a str,
}

#[derive(Serialize)]
struct PlayEndBody {
    session_id: Uuid,
    duration_seconds: u64,
}

#[async_trait]
impl AnalyticsService for HttpBackend {
    async fn start_listening(&self, start: &ListeningStart) -> PortResult<Uuid> {
        let body = PlayStartBody {
            ayah_id: start.item.item_id.0,
            surah_id: start.item.container.0,
            ayah_number: start.item.position,
            audio_edition: start.edition.as_str(),
        };
        let record: SessionRecord = self.post_json("/api/analytics/play-start", &body).await?;
        record
            .session_id
            .ok_or_else(|| PortError::Unexpected("play-start returned no session".to_string()))
    }

    async fn end_listening(&self, session: Uuid, duration_secs: u64) -> PortResult<()> {
        let body = PlayEndBody {
            session_id: session,
            duration_seconds: duration_secs,
        };
        self.post_json::<_, Ignored>("/api/analytics/play-end", &body)
            .await?;
        Ok(())
    }

    async fn start_corpus_session(&self) -> PortResult<CorpusSessionStart> {
        let response = self
            .send(self.client.post(self.endpoint("/api/quran-play/start")))
            .await?;
        let record: CorpusStartRecord = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(CorpusSessionStart {
            session_id: record
                .session_id
                .ok_or_else(|| PortError::Unexpected("quran-play returned no session".to_string()))?,
            start_container: ContainerId(record.start_surah),
            start_position: record.start_ayah,
        })
    }

    async fn end_corpus_session(&self, session: Uuid) -> PortResult<()> {
        self.send(
            self.client
                .post(self.endpoint(&format!("/api/quran-play/end/{}", session))),
        )
        .await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct BookmarkBody {
    ayah_id: u32,
    surah_id: u32,
    ayah_number_in_surah: u32,
}

#[async_trait]
impl BookmarkService for HttpBackend {
    async fn create_bookmark(&self, item: ItemRef) -> PortResult<Option<BookmarkId>> {
        let body = BookmarkBody {
            ayah_id: item.item_id.0,
            surah_id: item.container.0,
            ayah_number_in_surah: item.position,
        };
        let record: BookmarkCreatedRecord = self.post_json("/api/bookmarks", &body).await?;
        Ok(record.id)
    }

    async fn delete_bookmark(&self, bookmark: BookmarkId) -> PortResult<()> {
        self.send(
            self.client
                .delete(self.endpoint(&format!("/api/bookmarks/{}", bookmark))),
        )
        .await?;
        Ok(())
    }

    async fn bookmarks_for_container(
        &self,
        container: ContainerId,
    ) -> PortResult<HashMap<ItemId, BookmarkId>> {
        // JSON object keys arrive as strings.
        let raw: HashMap<String, Uuid> = self
            .get_json(&format!("/api/bookmarks/surah/{}", container), &[])
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|(item, id)| match item.parse::<u32>() {
                Ok(item) => Some((ItemId(item), id)),
                Err(_) => {
                    warn!("Skipping bookmark with non-numeric item key {:?}", item);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl AudioFetcher for HttpBackend {
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        let response = self.send(self.client.get(url)).await?;
        response
            .bytes()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_item_record_maps_both_shapes() {
        let last: NextItemRecord = serde_json::from_str(r#"{"is_last": true}"#).unwrap();
        assert_eq!(last.to_domain().unwrap(), NextItem::Last);

        let next: NextItemRecord = serde_json::from_str(
            r#"{"ayah_number": 8, "surah_id": 2, "ayah_id": 8, "number_in_surah": 1, "is_last": false}"#,
        )
        .unwrap();
        assert_eq!(
            next.to_domain().unwrap(),
            NextItem::Item {
                item_id: ItemId(8),
                container: ContainerId(2),
                position: 1,
                global_number: 8,
            }
        );

        let broken: NextItemRecord = serde_json::from_str(r#"{"is_last": false}"#).unwrap();
        assert!(broken.to_domain().is_err());
    }

    #[test]
    fn sequential_record_maps_backend_names() {
        let record: SequentialRecord = serde_json::from_str(
            r#"{"sequential_completion_count": 3, "sequential_percentage": 0.05,
                "first_incomplete_ayah": 4, "first_incomplete_surah": 1, "is_complete": false}"#,
        )
        .unwrap();
        let progress = record.to_domain();
        assert_eq!(progress.sequential_count, 3);
        assert_eq!(progress.first_incomplete_container, Some(ContainerId(1)));
        assert_eq!(progress.first_incomplete_position, Some(4));
    }

    #[test]
    fn audio_url_follows_edition_and_global_number() {
        let store: Arc<dyn ClientStore> = Arc::new(crate::adapters::MemoryStore::default());
        let backend = HttpBackend::new("http://localhost:8000/", "https://cdn.example/audio/", store).unwrap();
        assert_eq!(
            backend.audio_url(&Edition::new("ar.alafasy"), 262),
            "https://cdn.example/audio/ar.alafasy/262.mp3"
        );
    }
}
