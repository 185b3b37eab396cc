// S3F-RS: a hybrid network emulation/simulation runtime
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! The per-Timeline event list: `push`/`pop`/`peek`/`len`/`is_empty`/
//! `clear`/`get_time`, generalizing `trix::timing_model::TimingModel`'s
//! `bgpsim::event::EventQueue` impl (spec.md §4.D, §9 "Process/Activation
//! callbacks"). Unlike the teacher's `PriorityQueue<_, Reverse<NotNan<f64>>>`
//! (a float-ordering workaround), the key here is the exact integer triple
//! `(vtime, priority, sequence)` spec.md §3 names, which is already totally
//! ordered.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::Vtime;

pub type Priority = u8;
pub type Sequence = u64;

/// Lazy-cancellation handle returned by `push`: the entity that scheduled
/// the event may call `cancel()`; the cancellation takes effect the next
/// time the scheduler dequeues the entry (spec.md §4.D "Cancellation").
#[derive(Debug, Clone)]
pub struct Cancellable(Arc<AtomicBool>);

impl Cancellable {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Entry<T> {
    time: Vtime,
    priority: Priority,
    sequence: Sequence,
    cancelled: Arc<AtomicBool>,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.priority, self.sequence) == (other.time, other.priority, other.sequence)
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.priority, self.sequence).cmp(&(other.time, other.priority, other.sequence))
    }
}

/// Generalizes the teacher's `EventQueue` trait (`bgpsim::event::EventQueue`)
/// to the exact-integer `(vtime, priority, sequence)` ordering spec.md §3
/// requires instead of the teacher's `NotNan<f64>` workaround.
pub trait EventQueue<T> {
    fn push(&mut self, time: Vtime, priority: Priority, payload: T) -> Cancellable;
    fn pop(&mut self) -> Option<(Vtime, Priority, T)>;
    fn peek_time(&mut self) -> Option<Vtime>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);
    fn get_time(&self) -> Vtime;
}

/// `BinaryHeap<Reverse<(vtime, Priority, Sequence)>>`-backed default
/// implementation (spec.md §9).
pub struct BinaryHeapQueue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_sequence: Sequence,
    now: Vtime,
}

impl<T> Default for BinaryHeapQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            now: 0,
        }
    }
}

impl<T> BinaryHeapQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peeks past cancelled head entries without popping them, so `peek_time`
    /// reflects the next event that will actually fire.
    fn drop_cancelled_head(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.cancelled.load(Ordering::SeqCst) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}

impl<T> EventQueue<T> for BinaryHeapQueue<T> {
    fn push(&mut self, time: Vtime, priority: Priority, payload: T) -> Cancellable {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.heap.push(Reverse(Entry {
            time,
            priority,
            sequence,
            cancelled: cancelled.clone(),
            payload,
        }));
        Cancellable(cancelled)
    }

    fn pop(&mut self) -> Option<(Vtime, Priority, T)> {
        loop {
            let Reverse(entry) = self.heap.pop()?;
            if entry.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            self.now = entry.time;
            return Some((entry.time, entry.priority, entry.payload));
        }
    }

    fn peek_time(&mut self) -> Option<Vtime> {
        self.drop_cancelled_head();
        self.heap.peek().map(|Reverse(e)| e.time)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
    }

    fn get_time(&self) -> Vtime {
        self.now
    }
}
