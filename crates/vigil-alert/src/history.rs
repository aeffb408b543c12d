use std::collections::VecDeque;
use vigil_common::types::Alert;

/// Insertion-ordered alert history holding at most `capacity` entries.
pub struct AlertHistory {
    capacity: usize,
    data: VecDeque<Alert>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: VecDeque::new(),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        self.data.push_back(alert);
        self.evict();
    }

    fn evict(&mut self) {
        while self.data.len() > self.capacity {
            self.data.pop_front();
        }
    }

    /// Applies `f` to the entry with `id`, if it has not been evicted yet.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut Alert)) -> bool {
        match self.data.iter_mut().rev().find(|a| a.id == id) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// The newest `limit` entries (all when `None`), oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<Alert> {
        let skip = limit.map_or(0, |l| self.data.len().saturating_sub(l));
        self.data.iter().skip(skip).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
