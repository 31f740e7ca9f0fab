use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::format::{format_game_time, GameTime};
use super::source::{Ticks, TimeSource};

/// The only clock state carried across save/load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub tick_offset: Ticks,
    pub start_ticks: Ticks,
    pub saved_at_ticks: Ticks,
}

/// Game-time cursor decoupled from wall-clock frame delivery.
///
/// In live mode `now()` follows the wall clock shifted by the start tick and
/// the accumulated offset. While paused it is frozen at the value observed
/// when the pause began. While the event scheduler drains a backlog it reports
/// the processing cursor instead, so callbacks see their own firing instant.
#[derive(Debug)]
pub struct VirtualClock {
    source: Rc<dyn TimeSource>,
    start_ticks: Cell<Ticks>,
    tick_offset: Cell<Ticks>,
    saved_at_ticks: Cell<Ticks>,
    paused: Cell<bool>,
    paused_snapshot: Cell<Ticks>,
    draining: Cell<bool>,
    processing_ticks: Cell<Ticks>,
}

impl VirtualClock {
    pub fn new(source: Rc<dyn TimeSource>) -> Self {
        let start_ticks = source.now_ticks();
        Self {
            source,
            start_ticks: Cell::new(start_ticks),
            tick_offset: Cell::new(0),
            saved_at_ticks: Cell::new(0),
            paused: Cell::new(false),
            paused_snapshot: Cell::new(0),
            draining: Cell::new(false),
            processing_ticks: Cell::new(0),
        }
    }

    pub fn with_source(source: impl TimeSource + 'static) -> Self {
        Self::new(Rc::new(source))
    }

    pub fn now(&self) -> Ticks {
        if self.paused.get() {
            return self.paused_snapshot.get();
        }
        if self.draining.get() {
            return self.processing_ticks.get();
        }
        self.live_now()
    }

    pub fn current_time(&self) -> GameTime {
        GameTime::from_ticks(self.now())
    }

    pub fn current_time_string(&self) -> String {
        format_game_time(self.now())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    pub fn processing_ticks(&self) -> Ticks {
        self.processing_ticks.get()
    }

    /// Returns `true` when the pause state actually changed.
    pub fn pause(&self, enabled: bool) -> bool {
        if self.paused.get() == enabled {
            return false;
        }

        if enabled {
            let frozen = self.now();
            self.paused_snapshot.set(frozen);
            self.paused.set(true);
            info!(frozen_ticks = frozen, "clock_paused");
        } else {
            let frozen = self.paused_snapshot.get();
            let wall_elapsed = self.wall_elapsed();
            self.tick_offset.set(frozen.saturating_sub(wall_elapsed));
            self.paused.set(false);
            info!(resumed_ticks = frozen, "clock_resumed");
        }
        true
    }

    pub fn toggle_pause(&self) -> bool {
        self.pause(!self.paused.get())
    }

    pub fn add_explicit_skip(&self, ticks: Ticks) {
        let ticks = ticks.max(0);
        self.tick_offset
            .set(self.tick_offset.get().saturating_add(ticks));
        if self.paused.get() {
            self.paused_snapshot
                .set(self.paused_snapshot.get().saturating_add(ticks));
        }
        info!(skipped_ticks = ticks, "clock_explicit_skip");
    }

    pub fn begin_drain(&self, real_now: Ticks) -> bool {
        if self.draining.get() {
            error!(real_now, "begin_drain_while_draining");
            return false;
        }
        if self.paused.get() {
            warn!(real_now, "begin_drain_while_paused");
            return false;
        }
        self.processing_ticks
            .set(self.processing_ticks.get().min(real_now));
        self.draining.set(true);
        true
    }

    pub fn end_drain(&self) -> bool {
        if !self.draining.get() {
            warn!("end_drain_without_begin");
            return false;
        }
        self.draining.set(false);
        true
    }

    /// Moves the processing cursor forward. Backward moves are refused.
    pub fn advance_processing_to(&self, ticks: Ticks) -> bool {
        let current = self.processing_ticks.get();
        if ticks < current {
            debug!(
                current_ticks = current,
                requested_ticks = ticks,
                "processing_advance_refused"
            );
            return false;
        }
        self.processing_ticks.set(ticks);
        true
    }

    pub fn persistable_offset(&self) -> ClockSnapshot {
        let saved_at_ticks = self.source.now_ticks();
        self.saved_at_ticks.set(saved_at_ticks);
        ClockSnapshot {
            tick_offset: self.tick_offset.get(),
            start_ticks: self.start_ticks.get(),
            saved_at_ticks,
        }
    }

    pub fn restore_offset(&self, snapshot: ClockSnapshot) {
        self.tick_offset.set(snapshot.tick_offset);
        self.start_ticks.set(snapshot.start_ticks);
        self.saved_at_ticks.set(snapshot.saved_at_ticks);

        let live = self.live_now();
        self.processing_ticks.set(live);
        if self.paused.get() {
            self.paused_snapshot.set(live);
        }
        info!(
            restored_ticks = live,
            offline_ticks = self.offline_ticks(),
            "clock_restored"
        );
    }

    pub fn reset_as_new(&self) {
        self.start_ticks.set(self.source.now_ticks());
        self.tick_offset.set(0);
        self.saved_at_ticks.set(0);
        self.processing_ticks.set(0);
        self.paused_snapshot.set(0);
    }

    pub fn saved_at_ticks(&self) -> Ticks {
        self.saved_at_ticks.get()
    }

    /// Wall time elapsed since the snapshot was last written or restored.
    pub fn offline_ticks(&self) -> Ticks {
        let saved_at = self.saved_at_ticks.get();
        if saved_at == 0 {
            return 0;
        }
        self.source.now_ticks().saturating_sub(saved_at).max(0)
    }

    fn wall_elapsed(&self) -> Ticks {
        self.source.now_ticks().saturating_sub(self.start_ticks.get())
    }

    // Snapshot fields come from disk, so every step saturates.
    fn live_now(&self) -> Ticks {
        self.wall_elapsed().saturating_add(self.tick_offset.get())
    }
}
