pub mod persist;
pub mod schedule;
pub mod time;

pub use persist::{
    load_clock_snapshot, save_clock_snapshot, try_load_clock_snapshot, PersistError, SAVE_VERSION,
};
pub use schedule::{
    CallbackError, CallbackResult, DeferredCommand, DeferredQueue, Event, EventCallback,
    EventHandle, EventId, EventOwner, EventScheduler, EventSnapshot, EventState, IntervalHandle,
    IntervalScheduler, SchedulerConfig, TickReport, TickStats, MAX_LINEAGE_DEPTH,
    SLOW_TICK_ENV_VAR,
};
pub use time::{
    format_game_time, seconds_to_ticks, ticks_to_seconds, ClockSnapshot, GameTime,
    ManualTimeSource, SystemTimeSource, Ticks, TimeSource, VirtualClock, TICKS_PER_MILLISECOND,
    TICKS_PER_SECOND,
};
