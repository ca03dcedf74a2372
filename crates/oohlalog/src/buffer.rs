// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO holding log entries until they are delivered.
//!
//! The buffer never applies backpressure: when it is full, [`EntryBuffer::add`]
//! evicts the oldest entry to make room for the new one. Entries leave the
//! buffer in only two ways, eviction or [`EntryBuffer::remove_front`] after a
//! confirmed delivery.
//!
//! ```text
//!   producers ──add()──▶ [ head ... tail ] ──snapshot(n)──▶ dispatcher
//!                                 ▲                              │
//!                                 └──remove_front(start, n)◀── success
//! ```
//!
//! Every entry gets a sequence number when it is added. A [`Snapshot`]
//! remembers the sequence of its first entry, so `remove_front` only drops
//! delivered entries that are still present, even if producers evicted part
//! of the batch while it was in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

use crate::entry::LogEntry;

#[derive(Debug, Default)]
struct Queue {
    entries: VecDeque<LogEntry>,
    /// Sequence number of `entries[0]`. Advances on every pop.
    head_seq: u64,
}

impl Queue {
    fn pop_front(&mut self) -> Option<LogEntry> {
        let entry = self.entries.pop_front()?;
        self.head_seq += 1;
        Some(entry)
    }
}

/// Entries copied from the head of the buffer by [`EntryBuffer::snapshot`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Sequence number of the first copied entry.
    pub start_seq: u64,
    pub entries: Vec<LogEntry>,
}

impl Snapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct EntryBuffer {
    queue: Mutex<Queue>,
    capacity: usize,
    evicted: AtomicU64,
    added: Notify,
}

impl EntryBuffer {
    /// Creates a buffer holding at most `capacity` entries.
    ///
    /// A zero capacity is treated as one; configuration validation rejects it
    /// before it gets here.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        EntryBuffer {
            queue: Mutex::new(Queue {
                entries: VecDeque::with_capacity(capacity),
                head_seq: 0,
            }),
            capacity,
            evicted: AtomicU64::new(0),
            added: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // A panic while holding the lock cannot leave the queue half-updated,
        // so a poisoned guard is still safe to use.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `entry` at the tail, evicting the head first if the buffer is
    /// full. Never blocks on delivery and never fails.
    pub fn add(&self, entry: LogEntry) {
        let evicted = {
            let mut queue = self.lock();
            let evicted = if queue.entries.len() >= self.capacity {
                queue.pop_front().is_some()
            } else {
                false
            };
            queue.entries.push_back(entry);
            evicted
        };

        if evicted {
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Buffer full, dropped oldest entry ({total} evicted so far)");
        }

        self.added.notify_one();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries dropped by capacity overwrite since construction.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Copies up to `max_count` entries from the head without removing them.
    #[must_use]
    pub fn snapshot(&self, max_count: usize) -> Snapshot {
        let queue = self.lock();
        Snapshot {
            start_seq: queue.head_seq,
            entries: queue.entries.iter().take(max_count).cloned().collect(),
        }
    }

    /// Removes the entries numbered `start_seq..start_seq + n` that are still
    /// at the head and returns how many were removed. Entries evicted since
    /// the snapshot are skipped, entries added after it are never touched.
    pub fn remove_front(&self, start_seq: u64, n: usize) -> usize {
        let mut queue = self.lock();
        let end_seq = start_seq.saturating_add(n as u64);
        let pending = usize::try_from(end_seq.saturating_sub(queue.head_seq)).unwrap_or(usize::MAX);
        let count = pending.min(queue.entries.len());
        queue.entries.drain(..count);
        queue.head_seq += count as u64;
        count
    }

    /// Resolves after the next [`add`](Self::add). A notification sent while
    /// nobody is waiting is kept, so a waiter never misses the latest insert.
    pub async fn added(&self) {
        self.added.notified().await;
    }
}
