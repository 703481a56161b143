//! In-memory log ring buffer
//!
//! Every tracing event is copied here by [`LogBufferLayer`] so the overlay
//! can show recent service logs through `/logs` without reading a file.

mod layer;

use std::collections::VecDeque;

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;

pub use layer::LogBufferLayer;

pub const DEFAULT_CAPACITY: usize = 500;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A captured log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub time: String,
    pub level: String,
    pub message: String,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    last_id: u64,
    /// Bumped by every `clear`
    generation: u64,
}

/// Read position that stays valid across `clear`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    pub generation: u64,
    pub last_id: u64,
}

/// Fixed-capacity log store; the oldest entries are dropped first
pub struct LogBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                last_id: 0,
                generation: 0,
            }),
            capacity,
        }
    }

    /// Capacity from `LOG_BUFFER_SIZE`, falling back to the default
    pub fn from_env() -> Self {
        let capacity = std::env::var("LOG_BUFFER_SIZE")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_CAPACITY);
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry and return its id
    pub fn push(&self, level: &str, message: impl Into<String>) -> u64 {
        let mut inner = self.inner.lock();
        inner.last_id += 1;
        let entry = LogEntry {
            id: inner.last_id,
            time: Local::now().format(TIME_FORMAT).to_string(),
            level: level.to_string(),
            message: message.into(),
        };
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry);
        inner.last_id
    }

    /// Entries newer than `since_id`, oldest first
    pub fn get_all(&self, since_id: u64) -> Vec<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.id > since_id)
            .cloned()
            .collect()
    }

    /// Cursor at `since_id` in the current generation
    pub fn cursor(&self, since_id: u64) -> LogCursor {
        LogCursor {
            generation: self.inner.lock().generation,
            last_id: since_id,
        }
    }

    /// Entries after `cursor` and the cursor past them
    ///
    /// A cursor from before a `clear`, or one ahead of the newest id,
    /// restarts from the oldest entry.
    pub fn read_from(&self, cursor: LogCursor) -> (Vec<LogEntry>, LogCursor) {
        let inner = self.inner.lock();
        let since = if cursor.generation == inner.generation && cursor.last_id <= inner.last_id {
            cursor.last_id
        } else {
            0
        };
        let entries: Vec<LogEntry> = inner
            .entries
            .iter()
            .filter(|e| e.id > since)
            .cloned()
            .collect();
        let next = LogCursor {
            generation: inner.generation,
            last_id: entries.last().map(|e| e.id).unwrap_or(since),
        };
        (entries, next)
    }

    pub fn last_id(&self) -> u64 {
        self.inner.lock().last_id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and restart ids from 1
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.last_id = 0;
        inner.generation += 1;
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
