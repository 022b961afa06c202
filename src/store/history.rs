//! Linear undo/redo bookkeeping over full-tree snapshots.
//!
//! The stack holds pre-mutation snapshots up to the cursor and, once an undo
//! has happened, the "future" states beyond it. Invariant: whenever the slot
//! exists, `snapshots[cursor + 1]` equals the live tree. A new mutation
//! truncates everything beyond the cursor; history branches are discarded,
//! not merged.

use serde_json::Value;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct HistoryStack {
    snapshots: Vec<Value>,
    /// Index of the snapshot taken before the most recent applied mutation,
    /// or -1 if no mutation has occurred.
    cursor: isize,
    capacity: usize,
}

impl HistoryStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            cursor: -1,
            capacity: capacity.max(1),
        }
    }

    /// Record the pre-mutation snapshot for a mutation about to be applied.
    pub fn record(&mut self, pre_mutation: Value) {
        self.snapshots.truncate((self.cursor + 1) as usize);
        self.snapshots.push(pre_mutation);
        self.cursor = self.snapshots.len() as isize - 1;

        if self.snapshots.len() > self.capacity {
            self.snapshots.remove(0);
            self.cursor -= 1;
        }
    }

    /// Step back one mutation. `current` is the live tree, kept so a later
    /// redo can restore it. Returns the tree to install, or `None` at the
    /// start boundary.
    pub fn undo(&mut self, current: &Value) -> Option<Value> {
        if self.cursor < 0 {
            return None;
        }
        if self.cursor as usize == self.snapshots.len() - 1 {
            self.snapshots.push(current.clone());
        }
        let snapshot = self.snapshots[self.cursor as usize].clone();
        self.cursor -= 1;
        Some(snapshot)
    }

    /// Step forward one undone mutation. Returns the tree to install, or
    /// `None` at the end boundary.
    pub fn redo(&mut self) -> Option<Value> {
        let target = (self.cursor + 2) as usize;
        if self.cursor + 2 > self.snapshots.len() as isize - 1 {
            return None;
        }
        self.cursor += 1;
        Some(self.snapshots[target].clone())
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.cursor = -1;
    }

    pub fn can_undo(&self) -> bool {
        self.cursor >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 2 <= self.snapshots.len() as isize - 1
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
