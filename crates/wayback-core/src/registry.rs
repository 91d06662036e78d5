//! In-flight conversation registry.
//!
//! The only state mutated concurrently by the poll loop and the handlers.
//! An id is present from dispatch until its handler has finished, including
//! the grace delay.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use crate::domain::ConversationId;

#[derive(Debug, Default)]
pub struct InFlight {
    ids: Mutex<HashSet<ConversationId>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<ConversationId>> {
        // The set stays consistent across a panic in another holder.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `id`. Returns `false` when a handler for it is already outstanding.
    pub fn try_acquire(&self, id: &ConversationId) -> bool {
        self.ids().insert(id.clone())
    }

    pub fn release(&self, id: &ConversationId) {
        self.ids().remove(id);
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.ids().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
