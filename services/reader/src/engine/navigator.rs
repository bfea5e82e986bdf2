//! services/reader/src/engine/navigator.rs
//!
//! Crossing a container boundary in continuous mode. The session cannot navigate
//! by itself, so it leaves a single-slot resume marker behind and asks the host
//! to mount the next container; the next session consumes the marker on mount.

use super::corpus::OrderedCorpusModel;
use super::keys;
use recitation_core::domain::{ContainerId, NextItem, ResumeMarker};
use recitation_core::ports::{ClientStore, PortError, PortResult};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What to do after the last item of a container finished in continuous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// Nothing follows: the corpus has been traversed.
    CorpusComplete,
    /// The next item is in the mounted container after all.
    SameContainer(usize),
    /// The next item starts another container.
    Navigate(ContainerId),
    /// The backend named a position of the mounted container that the local
    /// model does not have.
    Unresolved { container: ContainerId, position: u32 },
}

pub struct ResumeMarkerSlot {
    store: Arc<dyn ClientStore>,
}

impl ResumeMarkerSlot {
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self { store }
    }

    pub fn write(&self, marker: &ResumeMarker) -> PortResult<()> {
        let json =
            serde_json::to_string(marker).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.store.set(keys::RESUME_MARKER, &json)
    }

    /// Reads and clears the marker. The slot is emptied even when the stored
    /// value cannot be read back.
    pub fn consume(&self) -> Option<ResumeMarker> {
        let raw = self.store.get(keys::RESUME_MARKER);
        if let Err(e) = self.store.remove(keys::RESUME_MARKER) {
            warn!("Failed to clear resume marker: {}", e);
        }
        match raw {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(marker) => Some(marker),
                Err(e) => {
                    warn!("Discarding unreadable resume marker: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read resume marker: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CrossBoundaryNavigator {
    corpus_session: Option<Uuid>,
}

impl CrossBoundaryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corpus_session(&self) -> Option<Uuid> {
        self.corpus_session
    }

    pub fn adopt(&mut self, session: Option<Uuid>) {
        self.corpus_session = session;
    }

    /// Hands out the corpus session for closing. Only the first caller gets it.
    pub fn take_corpus_session(&mut self) -> Option<Uuid> {
        self.corpus_session.take()
    }

    pub fn decide(&self, next: NextItem, model: &OrderedCorpusModel) -> BoundaryDecision {
        match next {
            NextItem::Last => BoundaryDecision::CorpusComplete,
            NextItem::Item {
                container,
                position,
                ..
            } if container == model.id() => match model.index_of_position(position) {
                Some(index) => BoundaryDecision::SameContainer(index),
                None => BoundaryDecision::Unresolved { container, position },
            },
            NextItem::Item { container, .. } => BoundaryDecision::Navigate(container),
        }
    }

    /// The marker the next container's session will resume from.
    pub fn marker_for(&self, target: ContainerId) -> ResumeMarker {
        ResumeMarker {
            target,
            continuous: true,
            corpus_session: self.corpus_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use recitation_core::domain::{Container, Item, ItemId};

    fn model(id: u32, count: u32) -> OrderedCorpusModel {
        OrderedCorpusModel::new(Container {
            id: ContainerId(id),
            name: String::new(),
            english_name: String::new(),
            items: (1..=count)
                .map(|p| Item {
                    id: ItemId(id * 100 + p),
                    position: p,
                    global_number: p,
                    text: String::new(),
                    translation: None,
                })
                .collect(),
        })
    }

    fn next_in(container: u32, position: u32) -> NextItem {
        NextItem::Item {
            item_id: ItemId(container * 100 + position),
            container: ContainerId(container),
            position,
            global_number: 0,
        }
    }

    #[test]
    fn decisions_cover_all_three_outcomes() {
        let nav = CrossBoundaryNavigator::new();
        let a = model(1, 3);
        assert_eq!(nav.decide(NextItem::Last, &a), BoundaryDecision::CorpusComplete);
        assert_eq!(nav.decide(next_in(1, 3), &a), BoundaryDecision::SameContainer(2));
        assert_eq!(
            nav.decide(next_in(2, 1), &a),
            BoundaryDecision::Navigate(ContainerId(2))
        );
    }

    #[test]
    fn unknown_position_in_the_mounted_container_is_unresolved() {
        let nav = CrossBoundaryNavigator::new();
        let a = model(1, 3);
        assert_eq!(
            nav.decide(next_in(1, 4), &a),
            BoundaryDecision::Unresolved {
                container: ContainerId(1),
                position: 4
            }
        );
    }

    #[test]
    fn corpus_session_is_handed_out_once() {
        let mut nav = CrossBoundaryNavigator::new();
        let id = Uuid::new_v4();
        nav.adopt(Some(id));
        assert_eq!(nav.marker_for(ContainerId(4)).corpus_session, Some(id));
        assert_eq!(nav.take_corpus_session(), Some(id));
        assert_eq!(nav.take_corpus_session(), None);
    }

    #[test]
    fn marker_is_cleared_on_consume_even_when_corrupt() {
        let store = Arc::new(MemoryStore::default());
        let slot = ResumeMarkerSlot::new(store.clone());
        slot.write(&ResumeMarker {
            target: ContainerId(2),
            continuous: true,
            corpus_session: None,
        })
        .unwrap();
        assert_eq!(slot.consume().map(|m| m.target), Some(ContainerId(2)));
        assert!(slot.consume().is_none());

        store.set(keys::RESUME_MARKER, "{not json").unwrap();
        assert!(slot.consume().is_none());
        assert_eq!(store.get(keys::RESUME_MARKER).unwrap(), None);
    }
}
