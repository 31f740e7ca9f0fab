use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

pub type Ticks = i64;

pub const TICKS_PER_MILLISECOND: Ticks = 1_000;
pub const TICKS_PER_SECOND: Ticks = 1_000 * TICKS_PER_MILLISECOND;

pub fn seconds_to_ticks(seconds: f64) -> Ticks {
    (seconds * TICKS_PER_SECOND as f64).round() as Ticks
}

pub fn ticks_to_seconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Wall-clock collaborator feeding the virtual clock and interval scheduler.
pub trait TimeSource: fmt::Debug {
    fn now_ticks(&self) -> Ticks;
}

/// Microseconds since the Unix epoch. Never reports a value smaller than one
/// it already returned, even if the system clock is stepped backward.
#[derive(Debug, Default)]
pub struct SystemTimeSource {
    last: Cell<Ticks>,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ticks(&self) -> Ticks {
        let raw = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Ticks::try_from(elapsed.as_micros()).unwrap_or(Ticks::MAX),
            Err(error) => {
                warn!(error = %error, "system_clock_before_epoch");
                0
            }
        };
        let clamped = raw.max(self.last.get());
        self.last.set(clamped);
        clamped
    }
}

/// Hand-driven time source. Clones share the same cursor.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Rc<Cell<Ticks>>,
}

impl ManualTimeSource {
    pub fn new(start: Ticks) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, ticks: Ticks) {
        self.now.set(ticks);
    }

    pub fn advance(&self, ticks: Ticks) {
        self.now.set(self.now.get().saturating_add(ticks));
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ticks(&self) -> Ticks {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_clones_share_cursor() {
        let source = ManualTimeSource::new(10);
        let other = source.clone();
        other.advance(5);
        assert_eq!(source.now_ticks(), 15);
        source.set(3);
        assert_eq!(other.now_ticks(), 3);
    }

    #[test]
    fn system_source_is_non_decreasing() {
        let source = SystemTimeSource::new();
        let first = source.now_ticks();
        let second = source.now_ticks();
        assert!(first > 0);
        assert!(second >= first);
    }

    #[test]
    fn seconds_conversion_round_trips_whole_values() {
        assert_eq!(seconds_to_ticks(1.5), 1_500_000);
        assert!((ticks_to_seconds(2_500_000) - 2.5).abs() < 1e-9);
    }
}
