use std::collections::VecDeque;

use super::env::EnvId;

/// Ordered thread slots with a focus index. Focus only moves on `yield`
/// or when a finished task's slot is removed.
#[derive(Debug, Default)]
pub struct Scheduler {
    threads: VecDeque<EnvId>,
    current: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<EnvId> {
        self.threads.get(self.current).copied()
    }

    pub fn get(&self, index: usize) -> Option<EnvId> {
        self.threads.get(index).copied()
    }

    pub fn threads(&self) -> impl Iterator<Item = EnvId> + '_ {
        self.threads.iter().copied()
    }

    /// Starts a fresh thread list holding only `root`.
    pub fn reset(&mut self, root: EnvId) {
        self.threads.clear();
        self.threads.push_back(root);
        self.current = 0;
    }

    /// Inserts a new thread right after the focused one; focus stays put.
    pub fn spawn(&mut self, id: EnvId) {
        if self.threads.is_empty() {
            self.threads.push_back(id);
        } else {
            self.threads.insert(self.current + 1, id);
        }
    }

    pub fn replace_current(&mut self, id: EnvId) {
        if let Some(slot) = self.threads.get_mut(self.current) {
            *slot = id;
        }
    }

    pub fn replace(&mut self, index: usize, id: EnvId) {
        if let Some(slot) = self.threads.get_mut(index) {
            *slot = id;
        }
    }

    pub fn remove_current(&mut self) {
        self.threads.remove(self.current);
    }

    /// Moves focus to the previous slot, wrapping to the last.
    pub fn yield_focus(&mut self) {
        if self.threads.is_empty() {
            self.current = 0;
        } else if self.current > 0 {
            self.current -= 1;
        } else {
            self.current = self.threads.len() - 1;
        }
    }

    pub fn focus(&mut self, index: usize) {
        self.current = index.min(self.threads.len().saturating_sub(1));
    }
}
