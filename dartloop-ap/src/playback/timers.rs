//! Cancellable timer set
//!
//! Every outstanding timer of the scheduler (ramp steps and transitions)
//! lives in one [`TimerQueue`]. Entries are ordered by due time, ties broken
//! by arming order. Cancelled entries are dropped lazily when they reach the
//! front of the heap.

use crate::playback::ramp::RampId;
use dartloop_common::TransitionKind;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tokio::time::Instant;

/// Cancellation handle for one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Transition(TransitionKind),
    RampStep(RampId),
}

/// A timer popped from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub handle: TimerHandle,
    pub kind: TimerKind,
    pub due: Instant,
    /// Session generation the timer was armed in
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    due: Instant,
    seq: u64,
    kind: TimerKind,
    generation: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashSet<u64>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer firing at `due`
    pub fn arm(&mut self, due: Instant, kind: TimerKind, generation: u64) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            due,
            seq,
            kind,
            generation,
        }));
        self.live.insert(seq);
        TimerHandle(seq)
    }

    /// Cancel one timer; returns false if it already fired or was cancelled
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle.0)
    }

    /// Cancel everything; returns how many live timers were dropped
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.live.len();
        self.live.clear();
        self.heap.clear();
        cancelled
    }

    /// Due time of the earliest live timer
    pub fn next_due(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse(e)| e.due)
    }

    /// Pop the earliest live timer if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<FiredTimer> {
        self.discard_cancelled();
        let due = self.heap.peek().map(|Reverse(e)| e.due)?;
        if due > now {
            return None;
        }
        let Reverse(entry) = self.heap.pop()?;
        self.live.remove(&entry.seq);
        Some(FiredTimer {
            handle: TimerHandle(entry.seq),
            kind: entry.kind,
            due: entry.due,
            generation: entry.generation,
        })
    }

    /// Number of live (armed, not fired, not cancelled) timers
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.live.contains(&entry.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}
