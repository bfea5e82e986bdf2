//! Shared harness for the session tests: an in-memory backend, a recording
//! media element and a memory-backed client store.

#![allow(dead_code)]

use async_trait::async_trait;
use reader_lib::adapters::{InMemoryBackend, MemoryStore};
use reader_lib::engine::{keys, EngineSettings, Notification, ReaderDeps, ReaderSession};
use recitation_core::domain::{ContainerId, Edition, MediaEvent, DEFAULT_AUDIO_EDITION};
use recitation_core::ports::{ClientStore, CorpusService, MediaElement, MediaSource, PortError, PortResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Load { url: String, preloaded: bool },
    Play,
    Pause,
    Stop,
    Rate(f32),
    Volume(f32),
}

#[derive(Default)]
pub struct FakeMedia {
    calls: Mutex<Vec<MediaCall>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeMedia {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn loads(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Load { url, preloaded } => Some((url, preloaded)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_load(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    fn record(&self, call: MediaCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaElement for FakeMedia {
    async fn load(&self, source: MediaSource) -> PortResult<()> {
        self.record(MediaCall::Load {
            url: source.url.clone(),
            preloaded: source.preloaded.is_some(),
        });
        if self.failing.lock().unwrap().contains(&source.url) {
            return Err(PortError::Unexpected("unsupported source".to_string()));
        }
        Ok(())
    }

    async fn play(&self) -> PortResult<()> {
        self.record(MediaCall::Play);
        Ok(())
    }

    fn pause(&self) {
        self.record(MediaCall::Pause);
    }

    fn stop(&self) {
        self.record(MediaCall::Stop);
    }

    fn set_rate(&self, rate: f32) {
        self.record(MediaCall::Rate(rate));
    }

    fn set_volume(&self, volume: f32) {
        self.record(MediaCall::Volume(volume));
    }
}

pub struct Harness {
    pub backend: Arc<InMemoryBackend>,
    pub media: Arc<FakeMedia>,
    pub store: Arc<MemoryStore>,
    pub settings: EngineSettings,
}

impl Harness {
    /// A corpus of containers with the given item counts.
    pub fn new(layout: &[u32]) -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::with_layout(layout)),
            media: Arc::new(FakeMedia::default()),
            store: Arc::new(MemoryStore::default()),
            settings: EngineSettings::default(),
        }
    }

    pub fn sign_in(&self) {
        self.store.set(keys::AUTH_TOKEN, "token").unwrap();
    }

    pub fn deps(&self) -> ReaderDeps {
        ReaderDeps {
            corpus: self.backend.clone(),
            progress: self.backend.clone(),
            analytics: self.backend.clone(),
            bookmarks: self.backend.clone(),
            fetcher: self.backend.clone(),
            media: self.media.clone(),
            store: self.store.clone(),
        }
    }

    pub async fn mount(&self, container: u32) -> (ReaderSession, mpsc::UnboundedReceiver<Notification>) {
        let (mut session, notifications) =
            ReaderSession::mount(self.deps(), self.settings.clone(), ContainerId(container))
                .await
                .unwrap();
        session.pump().await;
        (session, notifications)
    }

    /// Audio address of the item with `global` number under the default edition.
    pub fn url(&self, global: u32) -> String {
        self.backend
            .audio_url(&Edition::new(DEFAULT_AUDIO_EDITION), global)
    }

    /// Reports that the item with `global` number played to the end.
    pub async fn finish(&self, session: &mut ReaderSession, global: u32) {
        session.handle().media_event(MediaEvent::Ended {
            url: self.url(global),
        });
        session.pump().await;
    }
}

pub fn drain(notifications: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        out.push(notification);
    }
    out
}
