use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use tempo::{
    save_clock_snapshot, ticks_to_seconds, try_load_clock_snapshot, CallbackError, EventHandle,
    EventOwner, EventScheduler, IntervalHandle, IntervalScheduler, TickReport, TimeSource,
    VirtualClock,
};
use tracing::{debug, info, warn};

use super::bootstrap::{HostConfig, HostError};

const SESSION_OWNER: &str = "gameplay_session";
const AUTOSAVE_PRIORITY: i32 = 10;

#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub(crate) save_path: PathBuf,
    pub(crate) autosave_interval: Duration,
    pub(crate) heartbeat_seconds: f64,
}

impl From<&HostConfig> for SessionSettings {
    fn from(config: &HostConfig) -> Self {
        Self {
            save_path: config.save_path.clone(),
            autosave_interval: config.autosave_interval,
            heartbeat_seconds: config.heartbeat_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionStart {
    Fresh,
    Restored,
}

struct SessionOwner;

impl EventOwner for SessionOwner {
    fn owner_name(&self) -> Option<String> {
        Some(SESSION_OWNER.to_string())
    }
}

/// One gameplay state. Owns the interval items it registers and cancels them
/// when the state is left.
pub(crate) struct GameplaySession {
    scheduler: Rc<EventScheduler>,
    intervals: IntervalScheduler,
    settings: SessionSettings,
    heartbeats: Rc<Cell<u64>>,
    autosaves: Rc<Cell<u64>>,
    heartbeat: Option<EventHandle>,
    autosave: Option<IntervalHandle>,
    active: bool,
}

impl GameplaySession {
    pub(crate) fn new(
        scheduler: Rc<EventScheduler>,
        source: Rc<dyn TimeSource>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            scheduler,
            intervals: IntervalScheduler::new(source),
            settings,
            heartbeats: Rc::new(Cell::new(0)),
            autosaves: Rc::new(Cell::new(0)),
            heartbeat: None,
            autosave: None,
            active: false,
        }
    }

    pub(crate) fn clock(&self) -> &Rc<VirtualClock> {
        self.scheduler.clock()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn heartbeats(&self) -> u64 {
        self.heartbeats.get()
    }

    pub(crate) fn autosaves(&self) -> u64 {
        self.autosaves.get()
    }

    pub(crate) fn enter(&mut self) -> SessionStart {
        if self.active {
            warn!("session_enter_while_active");
            return SessionStart::Restored;
        }

        self.scheduler.clear();
        let start = self.restore_or_reset();
        self.schedule_autosave();
        self.schedule_heartbeat();
        self.active = true;

        info!(
            start = ?start,
            game_time = %self.clock().current_time_string(),
            "session_entered"
        );
        start
    }

    /// One host frame: interval items first, then the event scheduler.
    pub(crate) fn update(&mut self) -> TickReport {
        if !self.active {
            return TickReport::default();
        }
        self.intervals.tick();
        let report = self.scheduler.tick();
        if report.loop_guard_hit {
            warn!(passes = report.passes, "session_tick_hit_loop_guard");
        }
        report
    }

    pub(crate) fn leave(&mut self) -> Result<(), HostError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        if let Some(handle) = self.autosave.take() {
            handle.cancel();
        }
        self.intervals.clear();
        if let Some(handle) = self.heartbeat.take() {
            handle.discard();
        }
        self.scheduler.clear();

        let snapshot = self.clock().persistable_offset();
        save_clock_snapshot(&self.settings.save_path, &snapshot)?;
        info!(
            heartbeats = self.heartbeats.get(),
            autosaves = self.autosaves.get(),
            game_time = %self.clock().current_time_string(),
            "session_left"
        );
        Ok(())
    }

    fn restore_or_reset(&self) -> SessionStart {
        match try_load_clock_snapshot(&self.settings.save_path) {
            Ok(Some(snapshot)) => {
                self.clock().restore_offset(snapshot);
                info!(
                    offline_seconds = ticks_to_seconds(self.clock().offline_ticks()),
                    "session_clock_restored"
                );
                SessionStart::Restored
            }
            Ok(None) => {
                self.clock().reset_as_new();
                SessionStart::Fresh
            }
            Err(error) => {
                warn!(error = %error, "session_snapshot_unreadable");
                self.clock().reset_as_new();
                SessionStart::Fresh
            }
        }
    }

    fn schedule_autosave(&mut self) {
        let clock = Rc::clone(self.clock());
        let path = self.settings.save_path.clone();
        let autosaves = Rc::clone(&self.autosaves);
        let handle = self.intervals.schedule(
            self.settings.autosave_interval,
            move || {
                let snapshot = clock.persistable_offset();
                save_clock_snapshot(&path, &snapshot)
                    .map_err(|error| CallbackError::failed(format!("autosave: {error}")))?;
                autosaves.set(autosaves.get() + 1);
                Ok(())
            },
            AUTOSAVE_PRIORITY,
        );
        self.autosave = Some(handle);
    }

    fn schedule_heartbeat(&mut self) {
        let seconds = self.settings.heartbeat_seconds;
        let heartbeats = Rc::clone(&self.heartbeats);
        let handle = self.scheduler.schedule_relative(
            &SessionOwner,
            "heartbeat",
            "beat",
            seconds,
            move |scheduler, event| {
                heartbeats.set(heartbeats.get() + 1);
                debug!(
                    beat = heartbeats.get(),
                    depth = event.depth(),
                    game_time = %scheduler.clock().current_time_string(),
                    "heartbeat"
                );
                scheduler.schedule_copy_relative(event, "beat", seconds);
                Ok(())
            },
        );
        self.heartbeat = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempo::{load_clock_snapshot, ManualTimeSource, TICKS_PER_SECOND};

    use super::*;

    struct Harness {
        _dir: tempfile::TempDir,
        source: ManualTimeSource,
        session: GameplaySession,
        save_path: PathBuf,
    }

    fn harness_at(start: i64, dir: tempfile::TempDir) -> Harness {
        let source = ManualTimeSource::new(start);
        let shared: Rc<dyn TimeSource> = Rc::new(source.clone());
        let clock = Rc::new(VirtualClock::new(Rc::clone(&shared)));
        let scheduler = Rc::new(EventScheduler::new(clock));
        let save_path = dir.path().join("clock.json");
        let settings = SessionSettings {
            save_path: save_path.clone(),
            autosave_interval: Duration::from_secs(5),
            heartbeat_seconds: 1.0,
        };
        Harness {
            _dir: dir,
            source,
            session: GameplaySession::new(scheduler, shared, settings),
            save_path,
        }
    }

    fn harness() -> Harness {
        harness_at(0, tempfile::tempdir().expect("tempdir"))
    }

    impl Harness {
        fn advance_frame(&mut self, ticks: i64) -> TickReport {
            self.source.advance(ticks);
            self.session.update()
        }
    }

    #[test]
    fn enter_without_save_starts_fresh_timeline() {
        let mut harness = harness();

        assert_eq!(harness.session.enter(), SessionStart::Fresh);

        assert!(harness.session.is_active());
        assert_eq!(harness.session.clock().now(), 0);
    }

    #[test]
    fn heartbeat_reschedules_itself_each_second() {
        let mut harness = harness();
        harness.session.enter();

        for _ in 0..3 {
            harness.advance_frame(TICKS_PER_SECOND);
        }

        assert_eq!(harness.session.heartbeats(), 3);
    }

    #[test]
    fn autosave_writes_snapshot_on_interval() {
        let mut harness = harness();
        harness.session.enter();

        harness.advance_frame(4 * TICKS_PER_SECOND);
        assert!(!harness.save_path.exists());

        harness.advance_frame(TICKS_PER_SECOND);
        assert!(harness.save_path.exists());
        assert_eq!(harness.session.autosaves(), 1);
    }

    #[test]
    fn leave_cancels_items_and_writes_final_snapshot() {
        let mut harness = harness();
        harness.session.enter();
        harness.advance_frame(2 * TICKS_PER_SECOND);

        harness.session.leave().expect("leave");

        assert!(!harness.session.is_active());
        let snapshot = load_clock_snapshot(&harness.save_path).expect("snapshot");
        assert_eq!(snapshot.saved_at_ticks, 2 * TICKS_PER_SECOND);

        let beats = harness.session.heartbeats();
        harness.advance_frame(10 * TICKS_PER_SECOND);
        assert_eq!(harness.session.heartbeats(), beats);
        assert_eq!(harness.session.autosaves(), 0);
    }

    #[test]
    fn reenter_restores_saved_timeline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clock.json");
        {
            let mut first = harness_at(0, tempfile::tempdir().expect("tempdir"));
            first.session.settings.save_path = path.clone();
            first.session.enter();
            first.advance_frame(3 * TICKS_PER_SECOND);
            first.session.leave().expect("leave");
        }

        let mut second = harness_at(10 * TICKS_PER_SECOND, dir);
        assert_eq!(second.session.enter(), SessionStart::Restored);
        assert_eq!(second.session.clock().offline_ticks(), 7 * TICKS_PER_SECOND);
    }

    #[test]
    fn corrupt_save_falls_back_to_fresh_timeline() {
        let mut harness = harness();
        fs::write(&harness.save_path, "{ not json").expect("seed");

        assert_eq!(harness.session.enter(), SessionStart::Fresh);
    }

    #[test]
    fn update_before_enter_is_idle() {
        let mut harness = harness();
        let report = harness.advance_frame(5 * TICKS_PER_SECOND);
        assert_eq!(report, TickReport::default());
        assert_eq!(harness.session.heartbeats(), 0);
    }
}
