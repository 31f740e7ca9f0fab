use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use tracing::{error, warn};

use super::error::CallbackResult;

pub type DeferredCommand = Box<dyn FnOnce() -> CallbackResult>;

/// FIFO of staged commands that is safe to append to while it drains.
///
/// Commands enqueued by a running command land at the back of the same queue
/// and run within the same `drain` call.
#[derive(Default)]
pub struct DeferredQueue {
    queued: RefCell<VecDeque<DeferredCommand>>,
    draining: Cell<bool>,
    running: Cell<usize>,
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("queued", &self.len())
            .field("draining", &self.draining.get())
            .field("running", &self.running.get())
            .finish()
    }
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, command: impl FnOnce() -> CallbackResult + 'static) {
        self.queued.borrow_mut().push_back(Box::new(command));
    }

    /// Runs queued commands in FIFO order. Returns `false` without doing any
    /// work when called reentrantly from inside a command.
    pub fn drain(&self) -> bool {
        if self.draining.get() {
            warn!(queued = self.len(), "deferred_drain_reentered");
            return false;
        }

        self.draining.set(true);
        let mut did_work = false;
        loop {
            let next = self.queued.borrow_mut().pop_front();
            let Some(command) = next else {
                break;
            };

            self.running.set(self.running.get() + 1);
            if let Err(error) = command() {
                error!(error = %error, "deferred_command_failed");
            }
            self.running.set(self.running.get() - 1);
            did_work = true;
        }
        self.draining.set(false);

        did_work
    }

    pub fn is_idle(&self) -> bool {
        self.queued.borrow().is_empty() && self.running.get() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    pub fn len(&self) -> usize {
        self.queued.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.queued.borrow_mut());
        drop(dropped);
    }
}
