use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::warn;

use crate::error::{Action, WorkflowError};

/// Per-action in-flight flags. A second trigger is rejected, never queued.
#[derive(Debug, Clone, Default)]
pub struct BusyGate {
    active: Arc<Mutex<HashSet<Action>>>,
}

fn lock(active: &Mutex<HashSet<Action>>) -> MutexGuard<'_, HashSet<Action>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, action: Action) -> Result<BusyGuard, WorkflowError> {
        if !lock(&self.active).insert(action) {
            warn!(action = %action, "busy: rejecting concurrent trigger");
            return Err(WorkflowError::Busy(action));
        }
        Ok(BusyGuard {
            active: Arc::clone(&self.active),
            action,
        })
    }

    pub fn is_busy(&self, action: Action) -> bool {
        lock(&self.active).contains(&action)
    }
}

/// Clears the flag on drop, so every exit path of the action releases it.
#[must_use = "the action is only marked busy while the guard is alive"]
#[derive(Debug)]
pub struct BusyGuard {
    active: Arc<Mutex<HashSet<Action>>>,
    action: Action,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.action);
    }
}

#[cfg(test)]
#[path = "tests/busy_tests.rs"]
mod tests;
