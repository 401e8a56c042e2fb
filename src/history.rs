//! Bounded execution history: §3 "History entry", §4.3 `get_history`.

use std::collections::VecDeque;

use serde::Serialize;

use crate::engine::ExecutionError;

/// A flattened copy of an execution result plus the source text that
/// produced it.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub execution_count: u64,
    pub source: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub value: Option<String>,
    pub error: Option<ExecutionError>,
    pub timed_out: bool,
}

/// Bounded FIFO of completed executions. Oldest entries drop off the front
/// once `capacity` is reached.
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Last `n` entries, oldest-first. `n <= 0` returns every entry.
    pub fn last_n(&self, n: i64) -> Vec<HistoryEntry> {
        if n <= 0 {
            return self.entries.iter().cloned().collect();
        }
        let n = n as usize;
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
