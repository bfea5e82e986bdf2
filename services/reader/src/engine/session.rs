//! services/reader/src/engine/session.rs
//!
//! The session actor for one mounted container. Commands, media events, timer
//! expiries and the results of its own background calls all arrive through one
//! inbox and are applied serially, so no component below needs locking.

use super::analytics::{AnalyticsSessionTracker, SessionClose};
use super::completion_store::{CompletionSnapshot, CompletionStore, SequentialCompletionValidator};
use super::corpus::OrderedCorpusModel;
use super::navigator::{BoundaryDecision, CrossBoundaryNavigator, ResumeMarkerSlot};
use super::observer::{ReadingObserver, VisibilitySample};
use super::pending::PendingActionQueue;
use super::persister::{PositionSource, ProgressPersister};
use super::playback::{PauseOutcome, PlaybackController, StartPlan};
use super::prefetch::PrefetchCache;
use super::protocol::{Command, Envelope, Internal, Notification, ReaderHandle};
use super::timers::{TimerKind, Timers};
use super::{keys, EngineError, EngineSettings, ReaderDeps};
use chrono::Utc;
use futures::future::join_all;
use recitation_core::domain::{
    BookmarkId, ContainerId, Edition, ItemId, ItemRef, LastPosition, ListeningStart, MediaEvent,
    PendingAction, PendingIntent, PlaybackStatus, SequentialProgress,
};
use recitation_core::ports::{MediaSource, PortError};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How many times `pump` yields so spawned calls can post their results.
const SETTLE_YIELDS: usize = 8;

pub struct ReaderSession {
    deps: ReaderDeps,
    settings: EngineSettings,
    model: OrderedCorpusModel,
    playback: PlaybackController,
    prefetch: PrefetchCache,
    analytics: AnalyticsSessionTracker,
    completions: CompletionStore,
    validator: SequentialCompletionValidator,
    observer: ReadingObserver,
    persister: ProgressPersister,
    navigator: CrossBoundaryNavigator,
    markers: ResumeMarkerSlot,
    pending: PendingActionQueue,
    bookmarks: HashMap<ItemId, BookmarkId>,
    timers: Timers,
    prefetch_anchor: Option<usize>,
    dwell_target: Option<usize>,
    /// Cancelled on unmount; every background call of this mount listens to it.
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Envelope>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    notifications: mpsc::UnboundedSender<Notification>,
    unmounted: bool,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

impl ReaderSession {
    //=====================================================================================
    // Lifecycle
    //=====================================================================================

    /// Loads `container` and builds a fresh session for it. A resume marker left
    /// by the previous container is consumed here.
    pub async fn mount(
        deps: ReaderDeps,
        settings: EngineSettings,
        container: ContainerId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), EngineError> {
        info!("Mounting container {}", container);
        let loaded = deps
            .corpus
            .load_container(container, &settings.text_edition, settings.translation.as_deref())
            .await?;
        let model = OrderedCorpusModel::new(loaded);

        let (tx, inbox) = mpsc::unbounded_channel();
        let (notifications, notification_rx) = mpsc::unbounded_channel();
        let passive = deps
            .store
            .get(keys::PASSIVE_TRACKING)
            .ok()
            .flatten()
            .as_deref()
            == Some("true");

        let mut session = Self {
            playback: PlaybackController::new(
                Edition::new(settings.audio_edition.clone()),
                settings.auto_advance,
            ),
            prefetch: PrefetchCache::new(settings.prefetch_depth),
            analytics: AnalyticsSessionTracker::new(),
            completions: CompletionStore::new(model.total_items()),
            validator: SequentialCompletionValidator::new(),
            observer: ReadingObserver::new(passive, settings.visibility_threshold),
            persister: ProgressPersister::new(settings.persist_debounce),
            navigator: CrossBoundaryNavigator::new(),
            markers: ResumeMarkerSlot::new(deps.store.clone()),
            pending: PendingActionQueue::new(),
            bookmarks: HashMap::new(),
            timers: Timers::new(),
            prefetch_anchor: None,
            dwell_target: None,
            cancel: CancellationToken::new(),
            tx,
            inbox,
            notifications,
            unmounted: false,
            model,
            deps,
            settings,
        };

        session.refresh_user_state().await;
        session.resume_from_marker();
        Ok((session, notification_rx))
    }

    pub fn handle(&self) -> ReaderHandle {
        ReaderHandle {
            tx: self.tx.clone(),
        }
    }

    /// Processes the inbox and timers until the session is unmounted.
    pub async fn run(mut self) {
        while !self.unmounted {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                envelope = self.inbox.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    self.fire_due_timers();
                }
            }
        }
        info!("Session for container {} stopped", self.model.id());
    }

    /// Applies everything already queued and every due timer, without waiting
    /// for anything new.
    pub async fn pump(&mut self) {
        loop {
            for _ in 0..SETTLE_YIELDS {
                tokio::task::yield_now().await;
            }
            let mut progressed = false;
            while let Ok(envelope) = self.inbox.try_recv() {
                self.dispatch(envelope).await;
                progressed = true;
            }
            if self.fire_due_timers() {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Tears the mount down: timers, observer and pending writes are dropped,
    /// background calls are cancelled, the listening session is closed.
    pub fn unmount(&mut self) {
        if self.unmounted {
            return;
        }
        info!("Unmounting container {}", self.model.id());
        self.unmounted = true;
        self.persister.cancel_all(&mut self.timers);
        self.timers.clear();
        self.observer.reset();
        self.dwell_target = None;
        self.prefetch_anchor = None;
        self.close_listening();
        self.cancel.cancel();
        self.deps.media.stop();
        self.prefetch.invalidate();
    }

    //=====================================================================================
    // Accessors
    //=====================================================================================

    pub fn container(&self) -> &OrderedCorpusModel {
        &self.model
    }

    pub fn status(&self) -> PlaybackStatus {
        self.playback.status()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.playback.current()
    }

    pub fn continuous(&self) -> bool {
        self.playback.continuous()
    }

    pub fn edition(&self) -> &Edition {
        self.playback.edition()
    }

    pub fn completion(&self) -> CompletionSnapshot {
        self.completions.snapshot()
    }

    pub fn is_complete(&self, index: usize) -> bool {
        self.model
            .item(index)
            .is_some_and(|item| self.completions.is_complete(item.position))
    }

    pub fn sequential(&self) -> Option<&SequentialProgress> {
        self.validator.latest()
    }

    pub fn is_bookmarked(&self, index: usize) -> bool {
        self.model
            .item(index)
            .is_some_and(|item| self.bookmarks.contains_key(&item.id))
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.pending.peek()
    }

    pub fn prefetched_indices(&self) -> Vec<usize> {
        self.prefetch.indices()
    }

    pub fn corpus_session(&self) -> Option<uuid::Uuid> {
        self.navigator.corpus_session()
    }

    //=====================================================================================
    // Playback
    //=====================================================================================

    /// Starts `index` under `edition`, or the selected edition when omitted.
    pub fn play(&mut self, index: usize, edition: Option<Edition>) -> Result<(), EngineError> {
        let edition = edition.unwrap_or_else(|| self.playback.edition().clone());
        self.start(index, edition, false)
    }

    pub fn pause(&mut self) -> Result<PauseOutcome, EngineError> {
        let outcome = self.playback.pause().ok_or(EngineError::NotPlaying)?;
        if outcome == PauseOutcome::Paused {
            self.deps.media.pause();
            self.close_listening();
            self.emit_state();
        }
        Ok(outcome)
    }

    /// Continues a paused item in place, or restarts the last played one.
    pub async fn resume(&mut self) -> Result<(), EngineError> {
        match self.playback.status() {
            PlaybackStatus::Loading | PlaybackStatus::Playing => Ok(()),
            PlaybackStatus::Paused => match self.deps.media.play().await {
                Ok(()) => {
                    self.playback.resumed();
                    self.emit_state();
                    self.open_listening();
                    Ok(())
                }
                Err(e) => {
                    self.playback.stop();
                    self.emit_state();
                    Err(e.into())
                }
            },
            PlaybackStatus::Idle | PlaybackStatus::Ended => {
                let index = self.playback.last_played().ok_or(EngineError::NothingToResume)?;
                self.play(index, None)
            }
        }
    }

    /// Pauses `index` when it is the one playing, otherwise plays it. A start
    /// still loading for `index` is left alone.
    pub fn toggle(&mut self, index: usize) -> Result<(), EngineError> {
        let is_current = self.playback.current() == Some(index);
        match (is_current, self.playback.status()) {
            (true, PlaybackStatus::Playing) => self.pause().map(|_| ()),
            (true, PlaybackStatus::Loading) => Ok(()),
            _ => self.play(index, None),
        }
    }

    /// Switches reciter. A playing or paused item restarts under the new edition
    /// and keeps its play/pause status.
    pub fn set_edition(&mut self, edition: Edition) -> Result<(), EngineError> {
        if &edition == self.playback.edition() {
            return Ok(());
        }
        info!(edition = %edition, "Switching edition");
        self.prefetch.invalidate();
        match self.playback.switch_edition(edition.clone()) {
            Some((index, hold_paused)) => self.start(index, edition, hold_paused),
            None => Ok(()),
        }
    }

    pub fn set_speed(&mut self, speed: f32) {
        let speed = self.playback.set_speed(speed);
        self.deps.media.set_rate(speed);
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = self.playback.set_volume(volume);
        self.deps.media.set_volume(volume);
    }

    pub fn set_auto_advance(&mut self, on: bool) {
        self.playback.set_auto_advance(on);
    }

    pub fn set_continuous(&mut self, on: bool) {
        self.playback.set_continuous(on);
        if !on {
            self.end_corpus_session();
        }
    }

    /// Opens a whole-corpus traversal starting at the first incomplete item,
    /// which may live in another container.
    pub async fn start_continuous(&mut self) -> Result<(), EngineError> {
        self.playback.set_continuous(true);
        let fallback = self.playback.last_played().unwrap_or(0);
        if !self.is_authenticated() {
            return self.play(fallback, None);
        }

        match self.deps.analytics.start_corpus_session().await {
            Ok(start) => {
                self.end_corpus_session();
                self.navigator.adopt(Some(start.session_id));
                info!(
                    "Corpus session {} starts at {}:{}",
                    start.session_id, start.start_container, start.start_position
                );
                if start.start_container == self.model.id() {
                    let index = self
                        .model
                        .index_of_position(start.start_position)
                        .unwrap_or(0);
                    self.play(index, None)
                } else {
                    self.hand_over(start.start_container)
                }
            }
            Err(e) => {
                warn!("Failed to open corpus session, continuing locally: {}", e);
                self.play(fallback, None)
            }
        }
    }

    fn start(&mut self, index: usize, edition: Edition, hold_paused: bool) -> Result<(), EngineError> {
        if self.unmounted {
            return Err(EngineError::Unmounted);
        }
        let item = self.model.item(index).ok_or(EngineError::InvalidIndex {
            index,
            len: self.model.len(),
        })?;
        let global_number = item.global_number;
        let position = LastPosition {
            container: self.model.id(),
            item_id: item.id,
            position: item.position,
        };

        self.close_listening();
        if &edition != self.playback.edition() {
            self.prefetch.invalidate();
        }
        let url = self.deps.corpus.audio_url(&edition, global_number);
        let plan = self.playback.begin(index, edition, url, hold_paused);
        debug!(index, url = %plan.url, "Starting item");
        self.emit_state();

        // Listening supersedes scrolling as the progress signal.
        self.timers.cancel(TimerKind::Dwell);
        self.dwell_target = None;
        self.observer.reset();

        self.persister
            .record(PositionSource::Playback, position, &mut self.timers);
        self.prefetch_anchor = Some(index);
        self.timers
            .schedule(TimerKind::PrefetchSettle, self.settings.prefetch_settle);
        self.spawn_start(plan);
        Ok(())
    }

    fn spawn_start(&mut self, plan: StartPlan) {
        let media = self.deps.media.clone();
        let source = MediaSource {
            preloaded: self.prefetch.take(&plan.url),
            url: plan.url,
        };
        let rate = self.playback.speed();
        let volume = self.playback.volume();
        let ticket = plan.ticket;
        let hold_paused = plan.hold_paused;

        self.spawn_tracked("media-start", async move {
            let result = async {
                media.load(source).await?;
                media.set_rate(rate);
                media.set_volume(volume);
                if !hold_paused {
                    media.play().await?;
                }
                Ok::<(), PortError>(())
            }
            .await;
            Some(Internal::MediaStarted { ticket, result })
        });
    }

    async fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Ended { url } => match self.playback.ended(&url) {
                Some(index) => self.on_ended(index).await,
                None => debug!(%url, "Ignoring ended event for a stale source"),
            },
            MediaEvent::Failed { url, reason } => {
                if let Some(index) = self.playback.media_failed(&url) {
                    error!("Playback of item {} failed: {}", index, reason);
                    self.close_listening();
                    self.emit_state();
                    self.notify(Notification::PlaybackFailed {
                        index,
                        message: reason,
                    });
                }
            }
        }
    }

    /// The live item finished playing.
    async fn on_ended(&mut self, index: usize) {
        self.close_listening();
        if let Some(position) = self.model.item(index).map(|item| item.position) {
            self.mark_complete(position);
        }

        let has_next = !self.model.is_last(index);
        let result = if self.playback.continuous() {
            if has_next {
                self.play(index + 1, None)
            } else {
                self.cross_boundary(index).await;
                Ok(())
            }
        } else if self.playback.auto_advance() {
            if has_next {
                self.play(index + 1, None)
            } else {
                self.playback.stop();
                self.emit_state();
                info!("Finished container {}", self.model.id());
                self.notify(Notification::ContainerFinished {
                    container: self.model.id(),
                });
                Ok(())
            }
        } else {
            self.playback.stop();
            self.emit_state();
            Ok(())
        };

        if let Err(e) = result {
            self.report(e);
        }
    }

    //=====================================================================================
    // Container boundaries
    //=====================================================================================

    async fn cross_boundary(&mut self, index: usize) {
        let Some(position) = self.model.item(index).map(|item| item.position) else {
            return;
        };
        let container = self.model.id();

        match self.deps.corpus.next_item(container, position).await {
            Ok(next) => match self.navigator.decide(next, &self.model) {
                BoundaryDecision::CorpusComplete => {
                    info!("Continuous playback reached the end of the corpus");
                    self.end_corpus_session();
                    self.playback.finish_corpus();
                    self.emit_state();
                    self.notify(Notification::CorpusFinished);
                }
                BoundaryDecision::SameContainer(next_index) => {
                    if let Err(e) = self.play(next_index, None) {
                        self.report(e);
                    }
                }
                BoundaryDecision::Navigate(target) => {
                    if let Err(e) = self.hand_over(target) {
                        self.abandon_continuous(e);
                    }
                }
                BoundaryDecision::Unresolved {
                    container,
                    position,
                } => self.abandon_continuous(EngineError::UnknownPosition {
                    container,
                    position,
                }),
            },
            Err(e) => self.abandon_continuous(e.into()),
        }
    }

    /// Leaves a resume marker for `target` and asks the host to mount it.
    fn hand_over(&mut self, target: ContainerId) -> Result<(), EngineError> {
        let marker = self.navigator.marker_for(target);
        self.markers.write(&marker)?;
        self.playback.stop();
        self.emit_state();
        info!("Handing continuous playback over to container {}", target);
        self.notify(Notification::Navigate { container: target });
        Ok(())
    }

    fn abandon_continuous(&mut self, err: EngineError) {
        error!("Continuous playback stopped: {}", err);
        self.playback.set_continuous(false);
        self.end_corpus_session();
        self.playback.stop();
        self.emit_state();
        self.notify(Notification::Error {
            message: err.to_string(),
        });
    }

    fn resume_from_marker(&mut self) {
        let Some(marker) = self.markers.consume() else {
            return;
        };
        if marker.target != self.model.id() || !marker.continuous {
            debug!("Discarding resume marker for container {}", marker.target);
            return;
        }
        info!("Resuming continuous playback in container {}", marker.target);
        self.playback.set_continuous(true);
        self.navigator.adopt(marker.corpus_session);
        if let Err(e) = self.play(0, None) {
            self.report(e);
        }
    }

    fn end_corpus_session(&mut self) {
        let Some(id) = self.navigator.take_corpus_session() else {
            return;
        };
        let analytics = self.deps.analytics.clone();
        tokio::spawn(async move {
            if let Err(e) = analytics.end_corpus_session(id).await {
                warn!("Failed to close corpus session {}: {}", id, e);
            }
        });
    }

    //=====================================================================================
    // Analytics
    //=====================================================================================

    fn open_listening(&mut self) {
        if !self.is_authenticated() {
            return;
        }
        let Some(item) = self.playback.current().and_then(|i| self.model.item_ref(i)) else {
            return;
        };
        let edition = self.playback.edition().clone();
        let ticket = self.analytics.begin(item, edition.clone(), Utc::now());
        let analytics = self.deps.analytics.clone();

        self.spawn_tracked("listening-open", async move {
            let result = analytics
                .start_listening(&ListeningStart { item, edition })
                .await;
            Some(Internal::ListeningOpened { ticket, result })
        });
    }

    fn close_listening(&mut self) {
        if let Some(close) = self.analytics.close(Utc::now()) {
            self.send_listening_close(close);
        }
    }

    fn send_listening_close(&self, close: SessionClose) {
        let analytics = self.deps.analytics.clone();
        // Not tied to the mount token: closes issued during unmount must still go out.
        tokio::spawn(async move {
            if let Err(e) = analytics.end_listening(close.id, close.duration_secs).await {
                warn!("Failed to close listening session {}: {}", close.id, e);
            }
        });
    }

    //=====================================================================================
    // Completion
    //=====================================================================================

    fn mark_complete(&mut self, position: u32) {
        if !self.is_authenticated() {
            return;
        }
        let Some(delta) = self.completions.mark(position) else {
            return;
        };
        self.notify_completion();
        let Some(item) = self.model.refs_for_positions(&delta.positions).first().copied() else {
            return;
        };
        let progress = self.deps.progress.clone();
        let id = delta.id;
        self.spawn_tracked("mark-complete", async move {
            let result = progress.mark_complete(item).await;
            Some(Internal::CompletionSettled { delta: id, result })
        });
    }

    fn mark_batch_complete(&mut self, positions: &[u32]) {
        if !self.is_authenticated() {
            return;
        }
        let Some(delta) = self.completions.mark_batch(positions) else {
            return;
        };
        self.notify_completion();
        let items = self.model.refs_for_positions(&delta.positions);
        let container = self.model.id();
        let progress = self.deps.progress.clone();
        let id = delta.id;
        debug!(count = items.len(), "Submitting completion batch");
        self.spawn_tracked("mark-batch", async move {
            let result = progress.mark_batch_complete(container, &items).await;
            Some(Internal::CompletionSettled { delta: id, result })
        });
    }

    /// Clears every completion in the mounted container. The last-read position
    /// is left alone.
    pub async fn clear_progress(&mut self) -> Result<(), EngineError> {
        let container = self.model.id();
        self.deps.progress.clear_container(container).await?;
        info!("Cleared progress for container {}", container);
        self.completions.clear();
        self.notify_completion();
        self.validate_sequential();
        Ok(())
    }

    fn validate_sequential(&mut self) {
        let progress = self.deps.progress.clone();
        self.spawn_tracked("validate-sequential", async move {
            let result = async {
                progress.validate_sequential().await?;
                progress.sequential_progress().await
            }
            .await;
            Some(Internal::SequentialRefreshed(result))
        });
    }

    //=====================================================================================
    // Passive reading
    //=====================================================================================

    pub fn set_passive_tracking(&mut self, on: bool) {
        if let Err(e) = self
            .deps
            .store
            .set(keys::PASSIVE_TRACKING, if on { "true" } else { "false" })
        {
            warn!("Failed to persist passive-tracking flag: {}", e);
        }
        self.observer.set_enabled(on);
        if !on {
            self.timers.cancel(TimerKind::Dwell);
            self.dwell_target = None;
        }
    }

    pub fn report_visibility(&mut self, samples: &[VisibilitySample]) {
        if !self.observer_active() {
            return;
        }
        if let Some(current) = self.observer.observe(samples) {
            self.dwell_target = Some(current);
            self.timers.schedule(TimerKind::Dwell, self.settings.dwell);
        }
    }

    fn observer_active(&self) -> bool {
        self.observer.enabled() && !self.playback.is_listening()
    }

    /// The reader settled on an item: everything before it counts as read.
    fn on_dwell(&mut self) {
        let Some(target) = self.dwell_target.take() else {
            return;
        };
        if !self.observer_active() || self.observer.current() != Some(target) {
            return;
        }
        let Some(last) = self.model.item(target).map(|item| LastPosition {
            container: self.model.id(),
            item_id: item.id,
            position: item.position,
        }) else {
            return;
        };

        debug!(position = last.position, "Reader settled on item");
        self.persister
            .record(PositionSource::Scroll, last, &mut self.timers);
        let batch = self.completions.backfill_through(last.position);
        if !batch.is_empty() {
            self.mark_batch_complete(&batch);
        }
    }

    //=====================================================================================
    // Bookmarks and authentication
    //=====================================================================================

    /// Toggles the bookmark on `index`; held for replay when signed out.
    pub async fn bookmark(&mut self, index: usize) -> Result<(), EngineError> {
        let item = self.model.item_ref(index).ok_or(EngineError::InvalidIndex {
            index,
            len: self.model.len(),
        })?;

        if !self.is_authenticated() {
            info!(item = %item.item_id, "Bookmark needs a login; holding it");
            self.pending.hold(PendingAction {
                item,
                intent: PendingIntent::Bookmark,
                created_at: Utc::now(),
            });
            self.notify(Notification::LoginRequired { item: item.item_id });
            return Ok(());
        }

        match self.bookmarks.get(&item.item_id).copied() {
            Some(bookmark) => {
                self.deps.bookmarks.delete_bookmark(bookmark).await?;
                self.bookmarks.remove(&item.item_id);
                self.notify(Notification::BookmarkChanged {
                    item: item.item_id,
                    bookmarked: false,
                });
                Ok(())
            }
            None => self.create_bookmark(item).await,
        }
    }

    async fn create_bookmark(&mut self, item: ItemRef) -> Result<(), EngineError> {
        if let Some(bookmark) = self.deps.bookmarks.create_bookmark(item).await? {
            self.bookmarks.insert(item.item_id, bookmark);
        }
        self.notify(Notification::BookmarkChanged {
            item: item.item_id,
            bookmarked: true,
        });
        Ok(())
    }

    /// The user signed in: keep the token, reload their state, replay the
    /// pending action once.
    pub async fn authenticated(&mut self, token: String) {
        if let Err(e) = self.deps.store.set(keys::AUTH_TOKEN, &token) {
            warn!("Failed to persist auth token: {}", e);
        }
        info!("Signed in; refreshing progress for container {}", self.model.id());
        self.refresh_user_state().await;
        self.replay_pending().await;
    }

    async fn replay_pending(&mut self) {
        let Some(action) = self.pending.take() else {
            return;
        };
        let present = action.item.container == self.model.id()
            && self.model.index_of_item(action.item.item_id).is_some();
        if !present {
            debug!(item = %action.item.item_id, "Pending action targets an item not loaded; dropping it");
            return;
        }

        match action.intent {
            PendingIntent::Bookmark => {
                if self.bookmarks.contains_key(&action.item.item_id) {
                    debug!(item = %action.item.item_id, "Item already bookmarked; nothing to replay");
                    return;
                }
                if let Err(e) = self.create_bookmark(action.item).await {
                    warn!("Replaying pending bookmark failed: {}", e);
                }
            }
        }
    }

    async fn refresh_user_state(&mut self) {
        if !self.is_authenticated() {
            return;
        }
        let container = self.model.id();
        match self.deps.progress.completion_stats(container).await {
            Ok(stats) => {
                self.completions.load(&stats);
                self.notify_completion();
            }
            Err(e) => warn!("Failed to load completions for container {}: {}", container, e),
        }
        match self.deps.bookmarks.bookmarks_for_container(container).await {
            Ok(bookmarks) => self.bookmarks = bookmarks,
            Err(e) => warn!("Failed to load bookmarks for container {}: {}", container, e),
        }
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.deps.store.get(keys::AUTH_TOKEN), Ok(Some(token)) if !token.is_empty())
    }

    //=====================================================================================
    // Message plumbing
    //=====================================================================================

    async fn dispatch(&mut self, envelope: Envelope) {
        if self.unmounted {
            return;
        }
        match envelope {
            Envelope::Command(command) => self.apply(command).await,
            Envelope::Media(event) => self.on_media_event(event).await,
            Envelope::Internal(message) => self.on_internal(message),
        }
    }

    async fn apply(&mut self, command: Command) {
        let result = match command {
            Command::Play { index, edition } => self.play(index, edition),
            Command::Pause => self.pause().map(|_| ()),
            Command::Resume => self.resume().await,
            Command::Toggle { index } => self.toggle(index),
            Command::SetEdition(edition) => self.set_edition(edition),
            Command::SetSpeed(speed) => {
                self.set_speed(speed);
                Ok(())
            }
            Command::SetVolume(volume) => {
                self.set_volume(volume);
                Ok(())
            }
            Command::SetContinuous(on) => {
                self.set_continuous(on);
                Ok(())
            }
            Command::SetAutoAdvance(on) => {
                self.set_auto_advance(on);
                Ok(())
            }
            Command::StartContinuous => self.start_continuous().await,
            Command::SetPassiveTracking(on) => {
                self.set_passive_tracking(on);
                Ok(())
            }
            Command::ReportVisibility(samples) => {
                self.report_visibility(&samples);
                Ok(())
            }
            Command::Bookmark { index } => self.bookmark(index).await,
            Command::Authenticated { token } => {
                self.authenticated(token).await;
                Ok(())
            }
            Command::ClearProgress => self.clear_progress().await,
            Command::Unmount => {
                self.unmount();
                Ok(())
            }
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::MediaStarted { ticket, result } => match result {
                Ok(()) => {
                    if let Some(status) = self.playback.started(ticket) {
                        self.emit_state();
                        if status == PlaybackStatus::Playing {
                            self.open_listening();
                        }
                    }
                }
                Err(e) => {
                    if let Some(index) = self.playback.start_failed(ticket) {
                        error!("Item {} could not start: {}", index, e);
                        self.emit_state();
                        self.notify(Notification::PlaybackFailed {
                            index,
                            message: e.to_string(),
                        });
                    }
                }
            },
            Internal::ListeningOpened { ticket, result } => match result {
                Ok(id) => {
                    if let Some(close) = self.analytics.opened(ticket, id) {
                        self.send_listening_close(close);
                    }
                }
                Err(e) => {
                    warn!("Failed to open listening session: {}", e);
                    self.analytics.open_failed(ticket);
                }
            },
            Internal::CompletionSettled { delta, result } => match result {
                Ok(()) => {
                    if self.completions.confirm(delta) {
                        self.validate_sequential();
                    }
                }
                Err(e) => {
                    warn!("Completion write failed, rolling back: {}", e);
                    if self.completions.roll_back(delta) {
                        self.notify_completion();
                        self.notify(Notification::Error {
                            message: "Progress could not be saved".to_string(),
                        });
                    }
                }
            },
            Internal::SequentialRefreshed(result) => match result {
                Ok(progress) => {
                    if self.validator.update(progress.clone()) {
                        self.notify(Notification::SequentialChanged(progress));
                    }
                }
                Err(e) => warn!("Sequential validation failed: {}", e),
            },
            Internal::Prefetched {
                edition,
                url,
                result,
            } => match result {
                Ok(bytes) => {
                    if !self.prefetch.fulfil(&edition, &url, bytes) {
                        debug!(%url, "Discarding prefetch nobody wants anymore");
                    }
                }
                Err(e) => {
                    debug!(%url, "Prefetch failed: {}", e);
                    self.prefetch.abandon(&url);
                }
            },
        }
    }

    /// Fires every due timer. Returns whether any fired.
    fn fire_due_timers(&mut self) -> bool {
        let due = self.timers.take_due(Instant::now());
        let fired = !due.is_empty();
        for kind in due {
            match kind {
                TimerKind::PersistPlayback | TimerKind::PersistScroll => {
                    if let Some(source) = PositionSource::from_timer(kind) {
                        self.flush_position(source);
                    }
                }
                TimerKind::Dwell => self.on_dwell(),
                TimerKind::PrefetchSettle => self.prefetch_ahead(),
            }
        }
        fired
    }

    fn flush_position(&mut self, source: PositionSource) {
        let Some(position) = self.persister.take(source) else {
            return;
        };
        if !self.is_authenticated() {
            return;
        }
        let progress = self.deps.progress.clone();
        self.spawn_tracked("last-position", async move {
            if let Err(e) = progress.upsert_last_position(position).await {
                warn!("Failed to save last position {}: {}", position.position, e);
            }
            None::<Internal>
        });
    }

    fn prefetch_ahead(&mut self) {
        let Some(anchor) = self.prefetch_anchor.take() else {
            return;
        };
        if self.playback.current() != Some(anchor) {
            return;
        }
        let edition = self.playback.edition().clone();
        let corpus = self.deps.corpus.clone();
        let model = &self.model;
        let requests = self.prefetch.plan(anchor, model.len(), &edition, |index| {
            model
                .item(index)
                .map(|item| corpus.audio_url(&edition, item.global_number))
        });
        if requests.is_empty() {
            return;
        }

        let fetcher = self.deps.fetcher.clone();
        self.spawn_tracked("prefetch", async move {
            let fetches = requests.into_iter().map(|request| {
                let fetcher = fetcher.clone();
                let edition = edition.clone();
                async move {
                    let result = fetcher.fetch(&request.url).await;
                    Internal::Prefetched {
                        edition,
                        url: request.url,
                        result,
                    }
                }
            });
            join_all(fetches).await
        });
    }

    /// Runs `task` in the background until it finishes or the mount is torn
    /// down, posting whatever it yields back into the inbox.
    fn spawn_tracked<F, R>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = R> + Send + 'static,
        R: IntoIterator<Item = Internal> + Send + 'static,
    {
        let token = self.cancel.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(task, "Background call cancelled"),
                outcome = fut => {
                    for message in outcome {
                        let _ = tx.send(Envelope::Internal(message));
                    }
                }
            }
        });
    }

    fn emit_state(&self) {
        self.notify(Notification::StateChanged {
            status: self.playback.status(),
            index: self.playback.current(),
        });
    }

    fn notify_completion(&self) {
        let snapshot = self.completions.snapshot();
        self.notify(Notification::CompletionChanged {
            completed_count: snapshot.completed_count,
            percentage: snapshot.percentage,
            first_gap: snapshot.first_gap,
        });
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    fn report(&self, err: EngineError) {
        warn!("{}", err);
        self.notify(Notification::Error {
            message: err.to_string(),
        });
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
