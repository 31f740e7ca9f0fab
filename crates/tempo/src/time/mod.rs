mod clock;
mod format;
mod source;

pub use clock::{ClockSnapshot, VirtualClock};
pub use format::{format_game_time, GameTime};
pub use source::{
    seconds_to_ticks, ticks_to_seconds, ManualTimeSource, SystemTimeSource, Ticks, TimeSource,
    TICKS_PER_MILLISECOND, TICKS_PER_SECOND,
};
