//! services/reader/src/engine/pending.rs
//!
//! One-slot holder for an auth-gated action attempted while signed out.

use recitation_core::domain::PendingAction;

#[derive(Debug, Default)]
pub struct PendingActionQueue {
    slot: Option<PendingAction>,
}

impl PendingActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds `action`, replacing whatever was waiting.
    pub fn hold(&mut self, action: PendingAction) -> Option<PendingAction> {
        self.slot.replace(action)
    }

    pub fn peek(&self) -> Option<&PendingAction> {
        self.slot.as_ref()
    }

    /// Removes the action for its single replay attempt.
    pub fn take(&mut self) -> Option<PendingAction> {
        self.slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recitation_core::domain::{ContainerId, ItemId, ItemRef, PendingIntent};

    fn bookmark(position: u32) -> PendingAction {
        PendingAction {
            item: ItemRef {
                item_id: ItemId(100 + position),
                container: ContainerId(3),
                position,
            },
            intent: PendingIntent::Bookmark,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn newest_action_wins_the_slot() {
        let mut queue = PendingActionQueue::new();
        assert!(queue.hold(bookmark(1)).is_none());
        let replaced = queue.hold(bookmark(7)).unwrap();
        assert_eq!(replaced.item.position, 1);
        assert_eq!(queue.peek().unwrap().item.position, 7);
    }

    #[test]
    fn take_empties_the_slot() {
        let mut queue = PendingActionQueue::new();
        queue.hold(bookmark(7));
        assert!(queue.take().is_some());
        assert!(queue.take().is_none());
    }
}
