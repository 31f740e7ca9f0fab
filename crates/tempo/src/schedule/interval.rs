use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::time::{Ticks, TimeSource};

use super::error::CallbackResult;

type IntervalHandler = Box<dyn FnMut() -> CallbackResult>;

/// Cancellation token for one interval item. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct IntervalHandle {
    id: u64,
    cancelled: Rc<Cell<bool>>,
}

impl IntervalHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removal is lazy: the item is dropped on the next `tick`.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

struct IntervalItem {
    id: u64,
    interval_ticks: Ticks,
    next_fire: Ticks,
    priority: i32,
    handler: IntervalHandler,
    cancelled: Rc<Cell<bool>>,
}

/// Fixed-rate recurring items driven by wall-clock ticks.
///
/// Due items run by descending priority, registration order breaking ties.
/// Re-arming is fixed-rate: a stalled frame does not push `next_fire` out, so
/// an item that fell behind runs once per tick until it has caught up.
pub struct IntervalScheduler {
    source: Rc<dyn TimeSource>,
    items: Vec<IntervalItem>,
    next_id: u64,
}

impl fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("items", &self.items.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl IntervalScheduler {
    pub fn new(source: Rc<dyn TimeSource>) -> Self {
        Self {
            source,
            items: Vec::new(),
            next_id: 0,
        }
    }

    pub fn schedule(
        &mut self,
        interval: Duration,
        handler: impl FnMut() -> CallbackResult + 'static,
        priority: i32,
    ) -> IntervalHandle {
        let mut interval_ticks = Ticks::try_from(interval.as_micros()).unwrap_or(Ticks::MAX);
        if interval_ticks <= 0 {
            warn!(priority, "interval_zero_clamped");
            interval_ticks = 1;
        }

        let id = self.next_id;
        self.next_id += 1;
        let cancelled = Rc::new(Cell::new(false));
        let now = self.source.now_ticks();
        self.items.push(IntervalItem {
            id,
            interval_ticks,
            next_fire: now.saturating_add(interval_ticks),
            priority,
            handler: Box::new(handler),
            cancelled: Rc::clone(&cancelled),
        });
        debug!(interval_id = id, interval_ticks, priority, "interval_scheduled");

        IntervalHandle { id, cancelled }
    }

    pub fn cancel(&self, handle: &IntervalHandle) {
        handle.cancel();
    }

    /// Runs every due item once. Returns how many handlers ran.
    pub fn tick(&mut self) -> usize {
        let now = self.source.now_ticks();

        let mut due: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.cancelled.get() && item.next_fire <= now)
            .map(|(index, _)| index)
            .collect();
        // Stable sort keeps registration order among equal priorities.
        due.sort_by_key(|&index| std::cmp::Reverse(self.items[index].priority));

        let mut ran = 0;
        for index in due {
            let item = &mut self.items[index];
            if item.cancelled.get() {
                continue;
            }
            if let Err(error) = (item.handler)() {
                error!(interval_id = item.id, error = %error, "interval_handler_failed");
            }
            item.next_fire = item.next_fire.saturating_add(item.interval_ticks);
            ran += 1;
        }

        self.items.retain(|item| !item.cancelled.get());
        ran
    }

    /// Cancels and drops every item.
    pub fn clear(&mut self) {
        for item in self.items.drain(..) {
            item.cancelled.set(true);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::schedule::CallbackError;
    use crate::time::{ManualTimeSource, TICKS_PER_SECOND};

    fn scheduler_at(start: Ticks) -> (IntervalScheduler, ManualTimeSource) {
        let source = ManualTimeSource::new(start);
        (IntervalScheduler::new(Rc::new(source.clone())), source)
    }

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> impl FnMut() -> CallbackResult {
        let log = Rc::clone(log);
        move || {
            log.borrow_mut().push(label);
            Ok(())
        }
    }

    #[test]
    fn due_items_run_by_descending_priority() {
        let (mut scheduler, source) = scheduler_at(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "low"), 0);
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "high"), 10);
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "mid"), 5);

        assert_eq!(scheduler.tick(), 0);
        source.advance(TICKS_PER_SECOND);
        assert_eq!(scheduler.tick(), 3);

        assert_eq!(*log.borrow(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let (mut scheduler, source) = scheduler_at(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "first"), 1);
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "second"), 1);
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "third"), 1);

        source.advance(TICKS_PER_SECOND);
        scheduler.tick();

        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn stalled_backlog_refires_once_per_tick_until_caught_up() {
        let (mut scheduler, source) = scheduler_at(0);
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        scheduler.schedule(
            Duration::from_secs(1),
            move || {
                counter.set(counter.get() + 1);
                Ok(())
            },
            0,
        );

        source.advance(3 * TICKS_PER_SECOND);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(count.get(), 1);

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(count.get(), 3);

        assert_eq!(scheduler.tick(), 0);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn fixed_rate_does_not_drift_with_late_ticks() {
        let (mut scheduler, source) = scheduler_at(0);
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        scheduler.schedule(
            Duration::from_secs(1),
            move || {
                counter.set(counter.get() + 1);
                Ok(())
            },
            0,
        );

        source.set(TICKS_PER_SECOND + TICKS_PER_SECOND / 2);
        scheduler.tick();
        source.set(2 * TICKS_PER_SECOND);
        scheduler.tick();

        assert_eq!(count.get(), 2);
    }

    #[test]
    fn cancelled_item_never_runs_and_is_removed_lazily() {
        let (mut scheduler, source) = scheduler_at(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = scheduler.schedule(Duration::from_secs(1), recorder(&log, "cancelled"), 0);
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "kept"), 0);

        scheduler.cancel(&handle);
        assert!(handle.is_cancelled());
        assert_eq!(scheduler.len(), 2);

        source.advance(TICKS_PER_SECOND);
        scheduler.tick();

        assert_eq!(*log.borrow(), vec!["kept"]);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn handler_can_cancel_a_later_item_in_the_same_tick() {
        let (mut scheduler, source) = scheduler_at(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let victim_slot: Rc<RefCell<Option<IntervalHandle>>> = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&victim_slot);
        let killer_log = Rc::clone(&log);
        scheduler.schedule(
            Duration::from_secs(1),
            move || {
                killer_log.borrow_mut().push("killer");
                if let Some(handle) = slot.borrow().as_ref() {
                    handle.cancel();
                }
                Ok(())
            },
            10,
        );
        let victim = scheduler.schedule(Duration::from_secs(1), recorder(&log, "victim"), 0);
        *victim_slot.borrow_mut() = Some(victim.clone());

        source.advance(TICKS_PER_SECOND);
        scheduler.tick();

        assert_eq!(*log.borrow(), vec!["killer"]);
        assert!(victim.is_cancelled());
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_others_and_still_rearms() {
        let (mut scheduler, source) = scheduler_at(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let failures = Rc::new(Cell::new(0));
        let failure_count = Rc::clone(&failures);
        scheduler.schedule(
            Duration::from_secs(1),
            move || {
                failure_count.set(failure_count.get() + 1);
                Err(CallbackError::failed("boom"))
            },
            5,
        );
        scheduler.schedule(Duration::from_secs(1), recorder(&log, "after"), 0);

        source.advance(TICKS_PER_SECOND);
        assert_eq!(scheduler.tick(), 2);
        source.advance(TICKS_PER_SECOND);
        assert_eq!(scheduler.tick(), 2);

        assert_eq!(failures.get(), 2);
        assert_eq!(*log.borrow(), vec!["after", "after"]);
    }

    #[test]
    fn clear_cancels_outstanding_handles() {
        let (mut scheduler, _source) = scheduler_at(0);
        let handle = scheduler.schedule(Duration::from_secs(1), || Ok(()), 0);

        scheduler.clear();

        assert!(handle.is_cancelled());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn dropping_scheduler_cancels_handles() {
        let (mut scheduler, _source) = scheduler_at(0);
        let handle = scheduler.schedule(Duration::from_millis(250), || Ok(()), 0);

        drop(scheduler);

        assert!(handle.is_cancelled());
    }

    #[test]
    fn zero_interval_is_clamped_to_one_tick() {
        let (mut scheduler, source) = scheduler_at(0);
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        scheduler.schedule(
            Duration::ZERO,
            move || {
                counter.set(counter.get() + 1);
                Ok(())
            },
            0,
        );

        assert_eq!(scheduler.tick(), 0);
        source.advance(1);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(count.get(), 1);
    }
}
