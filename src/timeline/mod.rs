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
//! The parallel discrete-event kernel: Timelines with their own clock and
//! event list, synchronization windows bounded by cross-Timeline delay
//! floors, and the channel-write algorithm spec.md §4.D specifies.

pub mod queue;

use std::collections::HashMap;

use queue::{BinaryHeapQueue, Cancellable, EventQueue, Priority};
use thiserror::Error;

use crate::Vtime;

pub type EntityId = u32;
pub type TimelineId = u32;
pub type OutChannelId = u32;
pub type InChannelId = u32;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("no such timeline {0}")]
    NoSuchTimeline(TimelineId),
    #[error("out channel {0} has no owning entity registered")]
    NoSuchOutChannel(OutChannelId),
}

/// A simulation object owned by exactly one Timeline (spec.md §3). Holds
/// the ids of its channels; state mutation happens only on the owning
/// Timeline's thread by construction (no `Entity` is ever shared across
/// `Timeline`s).
#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub id: EntityId,
    pub out_channels: Vec<OutChannelId>,
    pub in_channels: Vec<InChannelId>,
}

/// One `(out, in, transfer_delay, same_timeline?, asynchronous?)` binding
/// of an `OutChannel` (spec.md §3).
#[derive(Debug, Clone)]
pub struct Mapping {
    pub target_timeline: TimelineId,
    pub target_in_channel: InChannelId,
    pub transfer_delay: Vtime,
    pub same_timeline: bool,
    pub asynchronous: bool,
}

#[derive(Debug, Clone)]
pub struct OutChannel {
    pub id: OutChannelId,
    pub owner: EntityId,
    pub min_write_delay: Vtime,
    pub mappings: Vec<Mapping>,
}

#[derive(Debug, Clone)]
pub struct InChannel {
    pub id: InChannelId,
    pub owner: EntityId,
    pub min_delay: Vtime,
}

/// A single scheduling domain: own clock, own event list, own entities.
/// Mutated only by the thread that owns it (spec.md §5).
pub struct Timeline<E> {
    pub id: TimelineId,
    now: Vtime,
    horizon: Vtime,
    queue: BinaryHeapQueue<(EntityId, E)>,
    entities: HashMap<EntityId, Entity>,
    out_channels: HashMap<OutChannelId, OutChannel>,
    in_channels: HashMap<InChannelId, InChannel>,
}

impl<E> Timeline<E> {
    /// A fresh Timeline's synchronization window is the degenerate `[0,
    /// 0]` until a barrier (`Kernel::barrier_advance`) or an explicit
    /// override widens it — matching "the synchronization window is `[now,
    /// horizon]`" at simulation start (spec.md §3, §4.D).
    pub fn new(id: TimelineId) -> Self {
        Self {
            id,
            now: 0,
            horizon: 0,
            queue: BinaryHeapQueue::new(),
            entities: HashMap::new(),
            out_channels: HashMap::new(),
            in_channels: HashMap::new(),
        }
    }

    pub fn now(&self) -> Vtime {
        self.now
    }

    pub fn horizon(&self) -> Vtime {
        self.horizon
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn add_out_channel(&mut self, channel: OutChannel) {
        self.out_channels.insert(channel.id, channel);
    }

    pub fn add_in_channel(&mut self, channel: InChannel) {
        self.in_channels.insert(channel.id, channel);
    }

    pub fn out_channel(&self, id: OutChannelId) -> Option<&OutChannel> {
        self.out_channels.get(&id)
    }

    /// Schedule an event on this Timeline's own queue. Returns a handle the
    /// owning entity may use to cancel it (lazy deletion, spec.md §4.D).
    pub fn schedule_local(&mut self, time: Vtime, priority: Priority, entity: EntityId, payload: E) -> Cancellable {
        self.queue.push(time, priority, (entity, payload))
    }

    /// Pop and return the next due event with `fire_time <= self.horizon`,
    /// advancing `now` to its fire time (invariant: `now` never decreases,
    /// and no event with `fire_time < now` is ever dispatched — the pop
    /// source is itself ordered by `fire_time`, so this holds by
    /// construction).
    pub fn pop_due(&mut self) -> Option<(Vtime, EntityId, E)> {
        let next_time = self.queue.peek_time()?;
        if next_time > self.horizon {
            return None;
        }
        let (time, _priority, (entity, payload)) = self.queue.pop()?;
        debug_assert!(time >= self.now, "Timeline::now must never decrease");
        self.now = time;
        Some((time, entity, payload))
    }

    /// Run every event due at or before `self.horizon`, in scheduling
    /// order, passing each to `handler`. Models "each Timeline runs one
    /// cooperative event loop" (spec.md §4.D).
    pub fn run_due<F: FnMut(&mut Self, EntityId, E)>(&mut self, mut handler: F) {
        while let Some((_, entity, payload)) = self.pop_due() {
            handler(self, entity, payload);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }
}

/// Owns every Timeline plus cross-Timeline wiring; the only thing that can
/// mutably reach two Timelines at once (for a cross-Timeline channel
/// write), since within a single Timeline's own thread only that Timeline
/// is ever touched (spec.md §5).
pub struct Kernel<E> {
    timelines: Vec<Timeline<E>>,
}

impl<E> Kernel<E> {
    pub fn new(timelines: Vec<Timeline<E>>) -> Self {
        Self { timelines }
    }

    pub fn timeline(&self, id: TimelineId) -> Option<&Timeline<E>> {
        self.timelines.iter().find(|t| t.id == id)
    }

    pub fn timeline_mut(&mut self, id: TimelineId) -> Option<&mut Timeline<E>> {
        self.timelines.iter_mut().find(|t| t.id == id)
    }

    fn index_of(&self, id: TimelineId) -> Option<usize> {
        self.timelines.iter().position(|t| t.id == id)
    }

    fn two_mut(&mut self, a: usize, b: usize) -> (&mut Timeline<E>, &mut Timeline<E>) {
        assert_ne!(a, b);
        if a < b {
            let (left, right) = self.timelines.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.timelines.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// `min_cross_delay` for `target`: the minimum `min_write_delay +
    /// transfer_delay` over every cross-Timeline mapping whose target is
    /// `target`, or `None` if no such channel exists (unbounded horizon
    /// locally, spec.md §4.D).
    pub fn min_cross_delay(&self, target: TimelineId) -> Option<Vtime> {
        let mut best: Option<Vtime> = None;
        for tl in &self.timelines {
            if tl.id == target {
                continue;
            }
            for oc in tl.out_channels.values() {
                for m in &oc.mappings {
                    if m.same_timeline || m.target_timeline != target {
                        continue;
                    }
                    let delay = oc.min_write_delay + m.transfer_delay;
                    best = Some(best.map_or(delay, |b| b.min(delay)));
                }
            }
        }
        best
    }

    /// Advance every Timeline's horizon to `now + min_cross_delay` (or
    /// leave it unbounded if the Timeline has no incoming cross-Timeline
    /// channel). Models the synchronization barrier spec.md §4.D describes;
    /// all Timelines cross it together, since this single-process kernel
    /// has no independent notion of "ahead" vs. "behind" Timelines.
    pub fn barrier_advance(&mut self) {
        let new_horizons: Vec<(TimelineId, Vtime)> = self
            .timelines
            .iter()
            .map(|tl| {
                let horizon = match self.min_cross_delay(tl.id) {
                    Some(delay) => tl.now().saturating_add(delay),
                    None => Vtime::MAX,
                };
                (tl.id, horizon)
            })
            .collect();
        for (id, horizon) in new_horizons {
            if let Some(tl) = self.timeline_mut(id) {
                tl.horizon = horizon;
            }
        }
    }

    /// `write`: deliver `payload` from `out_channel` on `source` after
    /// `delay`, to every mapped `InChannel`. Returns `false` if any mapping
    /// was dropped (spec.md §4.D channel write algorithm, §7
    /// `CrossTimelineDropped`).
    pub fn write(
        &mut self,
        source: TimelineId,
        out_channel: OutChannelId,
        delay: Vtime,
        priority: Priority,
        entity: EntityId,
        payload: E,
    ) -> Result<bool, TimelineError>
    where
        E: Clone,
    {
        let src_idx = self.index_of(source).ok_or(TimelineError::NoSuchTimeline(source))?;
        let (min_write_delay, mappings, src_now, src_horizon) = {
            let tl = &self.timelines[src_idx];
            let oc = tl
                .out_channels
                .get(&out_channel)
                .ok_or(TimelineError::NoSuchOutChannel(out_channel))?;
            (oc.min_write_delay, oc.mappings.clone(), tl.now(), tl.horizon())
        };

        let mut all_delivered = true;
        for m in &mappings {
            let arrival = src_now + delay + m.transfer_delay;
            if m.same_timeline {
                self.timelines[src_idx].schedule_local(arrival, priority, entity, payload.clone());
                continue;
            }
            let legal = delay >= min_write_delay || arrival > src_horizon;
            if !legal {
                all_delivered = false;
                continue;
            }
            let Some(dst_idx) = self.index_of(m.target_timeline) else {
                all_delivered = false;
                continue;
            };
            let dst = if dst_idx == src_idx {
                &mut self.timelines[src_idx]
            } else {
                let (_, dst) = self.two_mut(src_idx, dst_idx);
                dst
            };
            dst.schedule_local(arrival, priority, entity, payload.clone());
        }
        Ok(all_delivered)
    }

    /// `progress(timeline, flag)`: run every event due at or before the
    /// Timeline's current horizon. In `Force` mode, also runs a barrier
    /// advance first even if it would otherwise be skippable (spec.md
    /// §4.D).
    pub fn progress<F: FnMut(&mut Timeline<E>, EntityId, E)>(
        &mut self,
        tid: TimelineId,
        flag: ProgressFlag,
        handler: F,
    ) -> Result<(), TimelineError> {
        if flag == ProgressFlag::Force {
            self.barrier_advance();
        }
        let tl = self.timeline_mut(tid).ok_or(TimelineError::NoSuchTimeline(tid))?;
        tl.run_due(handler);
        Ok(())
    }

    /// Resets an inconsistent Timeline after emulation drift: re-derives
    /// its horizon from the current barrier state (spec.md §4.D
    /// `fix_timeline`).
    pub fn fix_timeline(&mut self, tid: TimelineId) -> Result<(), TimelineError> {
        let new_horizon = match self.min_cross_delay(tid) {
            Some(delay) => {
                let now = self.timeline(tid).ok_or(TimelineError::NoSuchTimeline(tid))?.now();
                now.saturating_add(delay)
            }
            None => Vtime::MAX,
        };
        let tl = self.timeline_mut(tid).ok_or(TimelineError::NoSuchTimeline(tid))?;
        tl.horizon = new_horizon;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressFlag {
    NoForce,
    Force,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_timeline_kernel(min_write_delay: Vtime, transfer_delay: Vtime) -> Kernel<&'static str> {
        let mut t1 = Timeline::new(1);
        let mut t2 = Timeline::new(2);
        t1.add_entity(Entity {
            id: 0,
            out_channels: vec![0],
            in_channels: vec![],
        });
        t2.add_entity(Entity {
            id: 0,
            out_channels: vec![],
            in_channels: vec![0],
        });
        t1.add_out_channel(OutChannel {
            id: 0,
            owner: 0,
            min_write_delay,
            mappings: vec![Mapping {
                target_timeline: 2,
                target_in_channel: 0,
                transfer_delay,
                same_timeline: false,
                asynchronous: false,
            }],
        });
        t2.add_in_channel(InChannel {
            id: 0,
            owner: 0,
            min_delay: min_write_delay + transfer_delay,
        });
        Kernel::new(vec![t1, t2])
    }

    /// S4: write(delay=0) with min_write_delay=transfer_delay=10 only
    /// delivers after the barrier advances T1's horizon to >= 10; the
    /// payload then arrives at vtime 10.
    #[test]
    fn s4_window() {
        let mut kernel = two_timeline_kernel(10, 10);
        assert_eq!(kernel.min_cross_delay(2), Some(20));
        let delivered = kernel.write(1, 0, 0, 0, 0, "hello").unwrap();
        assert!(delivered);
        let mut seen = None;
        kernel.timeline_mut(2).unwrap().run_due(|_, _, payload| {
            seen = Some(payload);
        });
        assert_eq!(seen, None, "event at vtime 20 must not fire before the horizon opens");
        kernel.barrier_advance();
        kernel.timeline_mut(2).unwrap().run_due(|_, _, payload| {
            seen = Some(payload);
        });
        assert_eq!(seen, Some("hello"));
    }

    /// S5: at T1.horizon=5 a write with arrival=10 is legal (10 > 5);
    /// raising T1.horizon to 15 makes the same write illegal and it must
    /// report a dropped delivery.
    #[test]
    fn s5_cross_delivery_dropped() {
        let mut kernel = two_timeline_kernel(10, 10);
        kernel.timeline_mut(1).unwrap().horizon = 5;
        let delivered = kernel.write(1, 0, 0, 0, 0, "a").unwrap();
        assert!(delivered, "arrival (10) exceeds horizon (5): legal");

        kernel.timeline_mut(1).unwrap().horizon = 15;
        let delivered = kernel.write(1, 0, 0, 0, 0, "b").unwrap();
        assert!(!delivered, "arrival (10) is within horizon (15) and below min_write_delay: must drop");
    }

    /// Invariant 4: `now` never decreases and no event fires before it was
    /// scheduled to.
    #[test]
    fn timeline_monotonicity() {
        let mut t = Timeline::<&'static str>::new(1);
        t.horizon = Vtime::MAX;
        t.add_entity(Entity {
            id: 0,
            out_channels: vec![],
            in_channels: vec![],
        });
        t.schedule_local(50, 0, 0, "later");
        t.schedule_local(10, 0, 0, "earlier");
        let mut order = Vec::new();
        t.run_due(|tl, _, payload| order.push((tl.now(), payload)));
        assert_eq!(order, vec![(10, "earlier"), (50, "later")]);
    }

    /// Invariant 6: channel fairness — writes to the same mapping arrive in
    /// write order when their delays are equal (arrival times equal, and
    /// FIFO sequence tiebreaks).
    #[test]
    fn channel_fairness_same_mapping_write_order() {
        let mut kernel = two_timeline_kernel(0, 5);
        kernel.write(1, 0, 0, 0, 0, "first").unwrap();
        kernel.write(1, 0, 0, 0, 0, "second").unwrap();
        kernel.barrier_advance();
        let mut order = Vec::new();
        kernel.timeline_mut(2).unwrap().run_due(|_, _, payload| order.push(payload));
        assert_eq!(order, vec!["first", "second"]);
    }

    /// Cancellation: a cancelled event never fires.
    #[test]
    fn lazy_cancellation() {
        let mut t = Timeline::<&'static str>::new(1);
        t.horizon = Vtime::MAX;
        let handle = t.schedule_local(10, 0, 0, "x");
        handle.cancel();
        let mut fired = false;
        t.run_due(|_, _, _| fired = true);
        assert!(!fired);
    }
}
