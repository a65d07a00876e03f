//! BinaryHeap-based timer queue for the reactor.
//!
//! Stores only identifiers and deadlines; the reactor keeps the callbacks
//! so this structure stays trivially testable.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) amortized (lazy cancellation)
//! - Poll expired: O(k log n) where k = number of expired timers
//! - Next deadline: O(log n) worst case while scrubbing cancelled heads
//!
//! # Cancellation Strategy
//!
//! Lazy: cancelled ids go into a HashSet and are skipped when popped. This
//! avoids O(n) removal from the heap. The set is cleared whenever the heap
//! empties out.

use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::time::Instant;

// ===== Identifiers =====

/// Handle to a pending timer. Ids are monotonic per queue, which also
/// makes them the tie-break for timers sharing a deadline: earlier
/// insertion fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Why a timer callback is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The deadline passed.
    TimedOut,
    /// The timer was still pending at reactor teardown.
    Cancelled,
}

// ===== Heap plumbing =====

/// Wrapper for heap ordering (min-heap by deadline, then insertion order).
struct HeapEntry {
    deadline: Instant,
    id: TimerId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first),
        // tie-break by id for deterministic firing order.
        match other.deadline.cmp(&self.deadline) {
            std::cmp::Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}

// ===== Queue =====

pub struct TimerQueue {
    heap: BinaryHeap<HeapEntry>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        TimerQueue {
            heap: BinaryHeap::with_capacity(capacity),
            cancelled: HashSet::with_capacity(capacity / 4),
            next_id: 1,
            total_inserted: 0,
            total_fired: 0,
            total_cancelled: 0,
        }
    }

    /// Schedule a deadline and get its handle.
    pub fn insert(&mut self, deadline: Instant) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(HeapEntry { deadline, id });
        self.total_inserted += 1;
        id
    }

    /// Lazily cancel a pending timer. Returns false if the id was already
    /// cancelled or never existed in this queue's live range.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if id.0 == 0 || id.0 >= self.next_id {
            return false;
        }
        let inserted = self.cancelled.insert(id);
        if inserted {
            self.total_cancelled += 1;
        }
        inserted
    }

    /// Pop every timer whose deadline is at or before `now`, in firing
    /// order. Cancelled entries are dropped on the way out.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break; // heap is sorted, nothing further is due
            }
            let entry = match self.heap.pop() {
                Some(e) => e,
                None => break,
            };
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            self.total_fired += 1;
            expired.push(entry.id);
        }
        if self.heap.is_empty() {
            self.cancelled.clear();
        }
        expired
    }

    /// Earliest live deadline, with cancelled heads scrubbed off so the
    /// reported instant belongs to a timer that will actually fire.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.cancelled.contains(&entry.id) {
                let popped = self.heap.pop();
                if let Some(e) = popped {
                    self.cancelled.remove(&e.id);
                }
                continue;
            }
            return Some(entry.deadline);
        }
        if self.heap.is_empty() {
            self.cancelled.clear();
        }
        None
    }

    /// Remove and return every live timer in deadline order. Used at
    /// teardown so pending callbacks can be notified of cancellation.
    pub fn drain_all(&mut self) -> Vec<TimerId> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            out.push(entry.id);
        }
        self.cancelled.clear();
        out
    }

    /// Live timer count (heap minus pending cancellations).
    pub fn len(&self) -> usize {
        self.heap.len().saturating_sub(self.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            active: self.len(),
            pending_cancellations: self.cancelled.len(),
            total_inserted: self.total_inserted,
            total_fired: self.total_fired,
            total_cancelled: self.total_cancelled,
        }
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics snapshot for a [`TimerQueue`].
#[derive(Debug, Clone)]
pub struct TimerStats {
    /// Currently active (non-cancelled) timers
    pub active: usize,
    /// Cancelled but not yet removed from the heap
    pub pending_cancellations: usize,
    /// Total timers inserted (lifetime)
    pub total_inserted: u64,
    /// Total timers that fired (lifetime)
    pub total_fired: u64,
    /// Total timers cancelled (lifetime)
    pub total_cancelled: u64,
}
