//! In-memory time-ordered queue with a monotonic tie-break.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::ClockError;

/// Heap slot ordered by `(time, seq)`, reversed so the heap pops the earliest.
struct Slot<E> {
    time: f64,
    seq: u64,
    entry: E,
}

impl<E> PartialEq for Slot<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for Slot<E> {}

impl<E> PartialOrd for Slot<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Slot<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest time first, then earliest insertion (reversed for max-heap)
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded priority queue of `(time, entry)` pairs.
///
/// Entries pop in ascending time order; equal times pop in insertion order.
/// Entries are never compared with each other, so any payload type works.
pub struct InMemoryQueue<E> {
    max_depth: usize,
    next_seq: u64,
    slots: BinaryHeap<Slot<E>>,
}

impl<E> InMemoryQueue<E> {
    /// Create a new queue holding at most `max_depth` entries.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            next_seq: 0,
            slots: BinaryHeap::with_capacity(max_depth.min(1024)),
        }
    }

    /// Insert an entry at `time`, returning its insertion sequence number.
    ///
    /// # Errors
    ///
    /// Returns `ClockError::QueueFull` when the queue is at `max_depth`; the
    /// entry is dropped.
    pub fn push(&mut self, time: f64, entry: E) -> Result<u64, ClockError> {
        if self.slots.len() >= self.max_depth {
            return Err(ClockError::QueueFull(format!(
                "max queue depth {} reached",
                self.max_depth
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(Slot { time, seq, entry });
        Ok(seq)
    }

    /// Remove and return the earliest entry.
    pub fn pop(&mut self) -> Option<(f64, E)> {
        self.slots.pop().map(|slot| (slot.time, slot.entry))
    }

    /// Remove and return the earliest entry if it is due at or before `target`.
    pub fn pop_due(&mut self, target: f64) -> Option<(f64, E)> {
        if self.peek_time()? <= target {
            self.pop()
        } else {
            None
        }
    }

    /// Remove every entry due at or before `target`, in pop order.
    pub fn drain_due(&mut self, target: f64) -> Vec<(f64, E)> {
        let mut due = Vec::new();
        while let Some(item) = self.pop_due(target) {
            due.push(item);
        }
        due
    }

    /// Time of the earliest entry.
    #[must_use]
    pub fn peek_time(&self) -> Option<f64> {
        self.slots.peek().map(|slot| slot.time)
    }

    /// Insertion sequence number of the earliest entry.
    #[must_use]
    pub fn peek_seq(&self) -> Option<u64> {
        self.slots.peek().map(|slot| slot.seq)
    }

    /// Discard every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }
}
