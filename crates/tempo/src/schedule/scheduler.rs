use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::time::{seconds_to_ticks, Ticks, VirtualClock};

use super::config::SchedulerConfig;
use super::deferred::DeferredQueue;
use super::error::CallbackResult;
use super::event::{
    owner_label, Event, EventHandle, EventId, EventIdAllocator, EventOwner, EventParams,
    EventSnapshot,
};
use super::stats::{TickDurationWindow, TickStats};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: u32,
    pub discarded_skipped: u32,
    pub passes: u32,
    pub loop_guard_hit: bool,
    pub catching_up: bool,
    /// A callback paused the clock; the remaining due events stay queued.
    pub stopped_by_pause: bool,
}

// Ordered by (execution_at, id): ids are allocated at registration, so equal
// timestamps fire in the order they were scheduled.
struct QueuedEvent {
    execution_at: Ticks,
    id: EventId,
    event: Rc<Event>,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.execution_at == other.execution_at && self.id == other.id
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execution_at
            .cmp(&other.execution_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

// Discarded events are dropped from the index right away but linger in the
// heap until popped; `stale` counts them so the heap can be compacted.
const COMPACT_MIN_STALE: usize = 64;

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    index: HashMap<EventId, Rc<Event>>,
    finished: VecDeque<Rc<Event>>,
    stale: usize,
}

impl QueueState {
    fn forget_discarded(&mut self, id: EventId) {
        self.index.remove(&id);
        self.stale += 1;
        if self.stale < COMPACT_MIN_STALE || self.stale * 2 < self.heap.len() {
            return;
        }

        let before = self.heap.len();
        self.heap.retain(|Reverse(queued)| queued.event.is_pending());
        self.index.retain(|_, event| event.is_pending());
        self.stale = 0;
        debug!(
            removed = before - self.heap.len(),
            remaining = self.heap.len(),
            "event_queue_compacted"
        );
    }
}

enum Step {
    Empty,
    NotDue,
    Due(Rc<Event>),
}

/// Priority-ordered one-shot event dispatcher over a [`VirtualClock`].
///
/// Schedule and discard calls are safe from inside a firing callback: new
/// events are staged in a [`DeferredQueue`] and only become visible to the
/// priority queue at the drain points of `tick_at`.
pub struct EventScheduler {
    clock: Rc<VirtualClock>,
    config: SchedulerConfig,
    ids: EventIdAllocator,
    deferred: DeferredQueue,
    queue: Rc<RefCell<QueueState>>,
    ticking: Cell<bool>,
    catch_up_started: Cell<Option<Instant>>,
    tick_durations: RefCell<TickDurationWindow>,
}

impl EventScheduler {
    pub fn new(clock: Rc<VirtualClock>) -> Self {
        Self::with_config(clock, SchedulerConfig::default())
    }

    pub fn with_config(clock: Rc<VirtualClock>, config: SchedulerConfig) -> Self {
        Self {
            clock,
            config: config.normalized(),
            ids: EventIdAllocator::default(),
            deferred: DeferredQueue::new(),
            queue: Rc::new(RefCell::new(QueueState::default())),
            ticking: Cell::new(false),
            catch_up_started: Cell::new(None),
            tick_durations: RefCell::new(TickDurationWindow::default()),
        }
    }

    pub fn clock(&self) -> &Rc<VirtualClock> {
        &self.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn schedule(
        &self,
        owner: &dyn EventOwner,
        name: &str,
        sub_name: &str,
        execution_at: Ticks,
        scheduled_at: Ticks,
        callback: impl Fn(&EventScheduler, &Event) -> CallbackResult + 'static,
    ) -> EventHandle {
        let params = EventParams {
            id: self.ids.allocate(),
            owner_label: owner_label(owner),
            name: name.to_string(),
            sub_name: sub_name.to_string(),
            scheduled_at,
            execution_at,
            callback: Rc::new(callback),
        };
        self.stage(Event::new_rc(params, None))
    }

    pub fn schedule_relative(
        &self,
        owner: &dyn EventOwner,
        name: &str,
        sub_name: &str,
        seconds_from_now: f64,
        callback: impl Fn(&EventScheduler, &Event) -> CallbackResult + 'static,
    ) -> EventHandle {
        let now = self.clock.now();
        let execution_at = now.saturating_add(seconds_to_ticks(seconds_from_now));
        self.schedule(owner, name, sub_name, execution_at, now, callback)
    }

    /// Schedules a new event sharing owner, name and callback with `original`.
    pub fn schedule_copy(&self, original: &Event, sub_name: &str, execution_at: Ticks) -> EventHandle {
        let params = EventParams {
            id: self.ids.allocate(),
            owner_label: original.owner_label_rc(),
            name: original.name().to_string(),
            sub_name: sub_name.to_string(),
            scheduled_at: self.clock.now(),
            execution_at,
            callback: Rc::clone(original.callback()),
        };
        self.stage(Event::new_rc(params, Some(original)))
    }

    pub fn schedule_copy_relative(
        &self,
        original: &Event,
        sub_name: &str,
        seconds_from_now: f64,
    ) -> EventHandle {
        let execution_at = self
            .clock
            .now()
            .saturating_add(seconds_to_ticks(seconds_from_now));
        self.schedule_copy(original, sub_name, execution_at)
    }

    pub fn discard(&self, id: EventId) -> bool {
        let event = self.queue.borrow().index.get(&id).cloned();
        let Some(event) = event else {
            warn!(event_id = %id, "discard_unknown_event");
            return false;
        };

        if event.mark_discarded() {
            self.queue.borrow_mut().forget_discarded(id);
            debug!(event_id = %id, name = %event.full_name(), "event_discarded");
            true
        } else {
            debug!(event_id = %id, state = ?event.state(), "discard_ignored_not_pending");
            false
        }
    }

    /// Drops every pending and staged event. Outstanding handles observe the
    /// events as discarded.
    pub fn clear(&self) {
        self.deferred.clear();
        let (index, heap) = {
            let mut queue = self.queue.borrow_mut();
            queue.stale = 0;
            (
                std::mem::take(&mut queue.index),
                std::mem::take(&mut queue.heap),
            )
        };
        for Reverse(queued) in heap.iter() {
            queued.event.mark_discarded();
        }
        for event in index.values() {
            event.mark_discarded();
        }
        info!(dropped = index.len(), "scheduler_cleared");
        drop(heap);
        drop(index);
    }

    pub fn tick(&self) -> TickReport {
        self.tick_at(self.clock.now())
    }

    pub fn tick_at(&self, real_now: Ticks) -> TickReport {
        let mut report = TickReport::default();
        if self.ticking.get() {
            warn!(real_now, "tick_reentered");
            return report;
        }
        if self.clock.is_paused() {
            return report;
        }

        self.ticking.set(true);
        let started = Instant::now();
        report.catching_up = self.update_catch_up(real_now);

        self.deferred.drain();

        if !self.clock.begin_drain(real_now) {
            self.ticking.set(false);
            return report;
        }

        loop {
            report.passes += 1;
            let fired = self.run_pass(real_now, &mut report);
            self.deferred.drain();

            if self.clock.is_paused() {
                report.stopped_by_pause = true;
                info!(
                    processing_ticks = self.clock.processing_ticks(),
                    real_now,
                    "tick_stopped_by_pause"
                );
                break;
            }
            if fired == 0 {
                break;
            }
            if report.passes >= self.config.loop_guard_passes {
                if self.has_due(real_now) {
                    report.loop_guard_hit = true;
                    error!(
                        passes = report.passes,
                        fired = report.fired,
                        processing_ticks = self.clock.processing_ticks(),
                        real_now,
                        "tick_loop_guard_exhausted"
                    );
                }
                break;
            }
        }

        if !report.stopped_by_pause && self.queue.borrow().heap.is_empty() {
            self.clock.advance_processing_to(real_now);
        }
        self.clock.end_drain();
        self.ticking.set(false);

        let elapsed = started.elapsed();
        self.tick_durations.borrow_mut().record(elapsed);
        if elapsed > self.config.slow_tick_threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.config.slow_tick_threshold.as_millis() as u64,
                fired = report.fired,
                "tick_over_threshold"
            );
        }

        report
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking.get()
    }

    /// Events that are registered and still waiting to fire, staged or queued.
    pub fn pending_count(&self) -> usize {
        self.queue
            .borrow()
            .index
            .values()
            .filter(|event| event.is_pending())
            .count()
    }

    /// Entries in the priority queue, including discarded ones not yet purged.
    pub fn queued_count(&self) -> usize {
        self.queue.borrow().heap.len()
    }

    /// Events scheduled since the last drain point, not yet in the queue.
    pub fn staged_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn finished_events(&self) -> Vec<Rc<Event>> {
        self.queue.borrow().finished.iter().cloned().collect()
    }

    pub fn events_snapshot(&self) -> Vec<EventSnapshot> {
        let queue = self.queue.borrow();
        let mut snapshots: Vec<EventSnapshot> = queue
            .index
            .values()
            .filter(|event| event.is_pending())
            .chain(queue.finished.iter())
            .map(|event| EventSnapshot::from(event.as_ref()))
            .collect();
        snapshots.sort_by_key(|snapshot| (snapshot.execution_at, snapshot.id));
        snapshots
    }

    pub fn tick_stats(&self) -> TickStats {
        self.tick_durations.borrow().snapshot()
    }

    fn stage(&self, event: Rc<Event>) -> EventHandle {
        self.queue
            .borrow_mut()
            .index
            .insert(event.id(), Rc::clone(&event));

        let queue = Rc::clone(&self.queue);
        let staged = Rc::clone(&event);
        self.deferred.enqueue(move || {
            let mut queue = queue.borrow_mut();
            if !staged.is_pending() {
                queue.index.remove(&staged.id());
                return Ok(());
            }
            queue.heap.push(Reverse(QueuedEvent {
                execution_at: staged.execution_at(),
                id: staged.id(),
                event: staged,
            }));
            Ok(())
        });

        EventHandle::new(event)
    }

    fn next_step(&self, real_now: Ticks) -> Step {
        let mut queue = self.queue.borrow_mut();
        let Some(Reverse(head)) = queue.heap.peek() else {
            return Step::Empty;
        };
        if head.execution_at > real_now {
            return Step::NotDue;
        }

        match queue.heap.pop() {
            Some(Reverse(queued)) => {
                if queue.index.remove(&queued.id).is_none() {
                    queue.stale = queue.stale.saturating_sub(1);
                }
                Step::Due(queued.event)
            }
            None => Step::Empty,
        }
    }

    fn run_pass(&self, real_now: Ticks, report: &mut TickReport) -> u32 {
        let mut fired = 0;
        loop {
            let event = match self.next_step(real_now) {
                Step::Empty => break,
                Step::NotDue => {
                    self.clock.advance_processing_to(real_now);
                    break;
                }
                Step::Due(event) => event,
            };

            self.clock.advance_processing_to(event.execution_at());
            if !event.begin_firing() {
                report.discarded_skipped += 1;
                continue;
            }

            let callback = Rc::clone(event.callback());
            if let Err(error) = callback(self, &event) {
                error!(
                    event_id = %event.id(),
                    name = %event.full_name(),
                    error = %error,
                    "event_callback_failed"
                );
            }
            event.mark_finished();
            self.retain_finished(event);

            fired += 1;
            report.fired += 1;

            if self.clock.is_paused() {
                break;
            }
        }
        fired
    }

    fn has_due(&self, real_now: Ticks) -> bool {
        let queue = self.queue.borrow();
        queue
            .heap
            .peek()
            .is_some_and(|Reverse(head)| head.execution_at <= real_now)
            || !self.deferred.is_empty()
    }

    fn retain_finished(&self, event: Rc<Event>) {
        let limit = self.config.finished_history_len;
        if limit == 0 {
            return;
        }
        let mut queue = self.queue.borrow_mut();
        while queue.finished.len() >= limit {
            queue.finished.pop_front();
        }
        queue.finished.push_back(event);
    }

    fn update_catch_up(&self, real_now: Ticks) -> bool {
        let processed = self.clock.processing_ticks();
        let behind = real_now.saturating_sub(processed);
        if behind > self.config.catch_up_threshold_ticks {
            if self.catch_up_started.get().is_none() {
                warn!(
                    from_ticks = processed,
                    to_ticks = real_now,
                    behind_ms = behind / crate::time::TICKS_PER_MILLISECOND,
                    "catch_up_started"
                );
                self.catch_up_started.set(Some(Instant::now()));
            }
            return true;
        }

        if let Some(started) = self.catch_up_started.take() {
            warn!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "catch_up_finished"
            );
        }
        false
    }
}
