// src/sched/run_queue.rs

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::sched::entity::Entity;
use crate::types::Priority;

#[derive(Debug, Default)]
struct RunQueueState {
    entities: Vec<Entity>,
    /// Index of the entity to look at first on the next selection, modulo
    /// the current length. Entities added later land at or after it.
    cursor: usize,
}

/// The entities of one priority tier, served round robin.
///
/// Lock order: a run queue lock may be held while taking one entity lock,
/// never the other way round.
#[derive(Debug)]
pub struct RunQueue {
    priority: Priority,
    state: Mutex<RunQueueState>,
}

impl RunQueue {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            state: Mutex::new(RunQueueState::default()),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Add `entity` unless it is already present. Returns whether it was added.
    pub fn add_entity(&self, entity: &Entity) -> bool {
        let mut state = self.lock();
        if state.entities.iter().any(|e| e.ptr_eq(entity)) {
            return false;
        }
        state.entities.push(entity.clone());
        true
    }

    /// Remove `entity` if present. Returns whether it was removed.
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        let mut state = self.lock();
        match state.entities.iter().position(|e| e.ptr_eq(entity)) {
            Some(index) => {
                remove_at(&mut state, index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entities.is_empty()
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.lock().entities.clone()
    }

    /// Pick the next entity with a runnable head job.
    ///
    /// Scanning starts right after the entity chosen last time and wraps, so
    /// an entity is not chosen twice while another one has ready work.
    /// Entities with nothing queued are dropped from the set on the way; a
    /// later push adds them back.
    pub fn select_next_ready(&self) -> Option<Entity> {
        let mut state = self.lock();

        let mut index = 0;
        while index < state.entities.len() {
            if state.entities[index].is_idle() {
                let entity = remove_at(&mut state, index);
                trace!(priority = ?self.priority, entity = entity.id(), "compacted idle entity");
            } else {
                index += 1;
            }
        }

        let len = state.entities.len();
        if len == 0 {
            return None;
        }

        let start = state.cursor % len;
        for step in 0..len {
            let index = (start + step) % len;
            if state.entities[index].is_ready() {
                state.cursor = index + 1;
                return Some(state.entities[index].clone());
            }
        }
        None
    }

    fn lock(&self) -> MutexGuard<'_, RunQueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_at(state: &mut RunQueueState, index: usize) -> Entity {
    let entity = state.entities.remove(index);
    if index < state.cursor {
        state.cursor -= 1;
    }
    entity
}
