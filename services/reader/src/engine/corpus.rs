//! services/reader/src/engine/corpus.rs
//!
//! Read-only view of the mounted container. Array index is the address every
//! other component uses; positions are 1-based and only cross the backend boundary.

use recitation_core::domain::{Container, ContainerId, Item, ItemId, ItemRef};

pub struct OrderedCorpusModel {
    container: Container,
}

impl OrderedCorpusModel {
    pub fn new(container: Container) -> Self {
        Self { container }
    }

    pub fn id(&self) -> ContainerId {
        self.container.id
    }

    pub fn len(&self) -> usize {
        self.container.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.container.items.is_empty()
    }

    pub fn total_items(&self) -> u32 {
        self.container.total_items()
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.container.items.get(index)
    }

    pub fn item_ref(&self, index: usize) -> Option<ItemRef> {
        self.container.item_ref(index)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.len()
    }

    pub fn index_of_position(&self, position: u32) -> Option<usize> {
        self.container
            .items
            .iter()
            .position(|item| item.position == position)
    }

    pub fn index_of_item(&self, item_id: ItemId) -> Option<usize> {
        self.container.items.iter().position(|item| item.id == item_id)
    }

    /// Item refs for a list of positions, skipping any this container lacks.
    pub fn refs_for_positions(&self, positions: &[u32]) -> Vec<ItemRef> {
        positions
            .iter()
            .filter_map(|p| self.index_of_position(*p))
            .filter_map(|index| self.item_ref(index))
            .collect()
    }
}
