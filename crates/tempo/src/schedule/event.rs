use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::time::{ticks_to_seconds, Ticks};

use super::error::CallbackResult;
use super::EventScheduler;

pub const MAX_LINEAGE_DEPTH: u32 = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct EventIdAllocator {
    next: Cell<u64>,
}

impl EventIdAllocator {
    pub fn allocate(&self) -> EventId {
        let id = EventId(self.next.get());
        self.next.set(self.next.get().saturating_add(1));
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventState {
    Pending,
    Firing,
    Finished,
    Discarded,
}

/// Optional naming capability for whoever schedules events. Only used to label
/// events in diagnostics.
pub trait EventOwner {
    fn owner_name(&self) -> Option<String> {
        None
    }
}

impl EventOwner for &str {
    fn owner_name(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl EventOwner for String {
    fn owner_name(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl EventOwner for () {}

pub(crate) fn owner_label(owner: &dyn EventOwner) -> Rc<str> {
    match owner.owner_name() {
        Some(name) => Rc::from(name),
        None => {
            let identity = owner as *const dyn EventOwner as *const () as usize;
            Rc::from(format!("{identity:X}"))
        }
    }
}

pub type EventCallback = Rc<dyn Fn(&EventScheduler, &Event) -> CallbackResult>;

pub struct Event {
    this: Weak<Event>,
    id: EventId,
    owner_label: Rc<str>,
    name: String,
    sub_name: String,
    scheduled_at: Ticks,
    execution_at: Ticks,
    state: Cell<EventState>,
    original: Option<Weak<Event>>,
    original_id: Option<EventId>,
    depth: u32,
    callback: EventCallback,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("full_name", &self.full_name())
            .field("scheduled_at", &self.scheduled_at)
            .field("execution_at", &self.execution_at)
            .field("state", &self.state.get())
            .field("original_id", &self.original_id)
            .finish()
    }
}

pub(crate) struct EventParams {
    pub id: EventId,
    pub owner_label: Rc<str>,
    pub name: String,
    pub sub_name: String,
    pub scheduled_at: Ticks,
    pub execution_at: Ticks,
    pub callback: EventCallback,
}

impl Event {
    pub(crate) fn new_rc(params: EventParams, original: Option<&Event>) -> Rc<Event> {
        let (original, original_id, depth) = match original {
            Some(parent) => (
                Some(parent.this.clone()),
                Some(parent.id),
                parent.depth.saturating_add(1).min(MAX_LINEAGE_DEPTH),
            ),
            None => (None, None, 0),
        };

        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            id: params.id,
            owner_label: params.owner_label,
            name: params.name,
            sub_name: params.sub_name,
            scheduled_at: params.scheduled_at,
            execution_at: params.execution_at,
            state: Cell::new(EventState::Pending),
            original,
            original_id,
            depth,
            callback: params.callback,
        })
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn owner_label(&self) -> &str {
        &self.owner_label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sub_name(&self) -> &str {
        &self.sub_name
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} - {}.{} - [{}]",
            self.owner_label, self.name, self.sub_name, self.depth
        )
    }

    pub fn scheduled_at(&self) -> Ticks {
        self.scheduled_at
    }

    pub fn execution_at(&self) -> Ticks {
        self.execution_at
    }

    pub fn duration_ticks(&self) -> Ticks {
        self.execution_at.saturating_sub(self.scheduled_at)
    }

    pub fn state(&self) -> EventState {
        self.state.get()
    }

    pub fn is_pending(&self) -> bool {
        self.state.get() == EventState::Pending
    }

    pub fn original_id(&self) -> Option<EventId> {
        self.original_id
    }

    /// The event this one was copied from, if it is still alive.
    pub fn original(&self) -> Option<Rc<Event>> {
        self.original.as_ref().and_then(Weak::upgrade)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn normalized_progress(&self, now: Ticks) -> f32 {
        let total = self.duration_ticks();
        if total == 0 {
            return 0.0;
        }
        now.saturating_sub(self.scheduled_at) as f32 / total as f32
    }

    pub fn pending_seconds(&self, now: Ticks) -> f32 {
        if self.duration_ticks() == 0 {
            return 0.0;
        }
        ticks_to_seconds(self.execution_at.saturating_sub(now)) as f32
    }

    pub(crate) fn callback(&self) -> &EventCallback {
        &self.callback
    }

    pub(crate) fn owner_label_rc(&self) -> Rc<str> {
        Rc::clone(&self.owner_label)
    }

    /// Pending -> Discarded. Any other state is left untouched.
    pub(crate) fn mark_discarded(&self) -> bool {
        if self.state.get() != EventState::Pending {
            return false;
        }
        self.state.set(EventState::Discarded);
        true
    }

    pub(crate) fn begin_firing(&self) -> bool {
        if self.state.get() != EventState::Pending {
            return false;
        }
        self.state.set(EventState::Firing);
        true
    }

    pub(crate) fn mark_finished(&self) {
        self.state.set(EventState::Finished);
    }
}

/// Returned by every schedule call, before the event is visible in the queue.
#[derive(Debug, Clone)]
pub struct EventHandle {
    event: Rc<Event>,
}

impl EventHandle {
    pub(crate) fn new(event: Rc<Event>) -> Self {
        Self { event }
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    pub fn event(&self) -> &Rc<Event> {
        &self.event
    }

    pub fn state(&self) -> EventState {
        self.event.state()
    }

    /// Cooperative cancellation; has no effect once the event started firing.
    pub fn discard(&self) -> bool {
        self.event.mark_discarded()
    }
}

/// Read-only view of an event for inspection tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSnapshot {
    pub id: EventId,
    pub full_name: String,
    pub state: EventState,
    pub scheduled_at: Ticks,
    pub execution_at: Ticks,
    pub depth: u32,
    pub original_id: Option<EventId>,
}

impl From<&Event> for EventSnapshot {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            full_name: event.full_name(),
            state: event.state(),
            scheduled_at: event.scheduled_at,
            execution_at: event.execution_at,
            depth: event.depth,
            original_id: event.original_id,
        }
    }
}
