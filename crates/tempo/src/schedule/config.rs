use std::env;
use std::time::Duration;

use tracing::warn;

use crate::time::{Ticks, TICKS_PER_SECOND};

pub const SLOW_TICK_ENV_VAR: &str = "TEMPO_SLOW_TICK_MS";

const DEFAULT_LOOP_GUARD_PASSES: u32 = 500;
const DEFAULT_SLOW_TICK_THRESHOLD: Duration = Duration::from_millis(100);
const DEFAULT_FINISHED_HISTORY_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub loop_guard_passes: u32,
    pub catch_up_threshold_ticks: Ticks,
    pub slow_tick_threshold: Duration,
    pub finished_history_len: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            loop_guard_passes: DEFAULT_LOOP_GUARD_PASSES,
            catch_up_threshold_ticks: TICKS_PER_SECOND,
            slow_tick_threshold: DEFAULT_SLOW_TICK_THRESHOLD,
            finished_history_len: DEFAULT_FINISHED_HISTORY_LEN,
        }
    }
}

impl SchedulerConfig {
    /// Applies fallbacks for zero values and the slow-tick env override.
    pub(crate) fn normalized(self) -> Self {
        let slow_tick_threshold =
            normalize_non_zero_duration(self.slow_tick_threshold, DEFAULT_SLOW_TICK_THRESHOLD);
        Self {
            loop_guard_passes: normalize_loop_guard(self.loop_guard_passes),
            catch_up_threshold_ticks: self.catch_up_threshold_ticks.max(0),
            slow_tick_threshold: resolve_slow_tick_threshold(slow_tick_threshold),
            finished_history_len: self.finished_history_len,
        }
    }
}

fn normalize_loop_guard(passes: u32) -> u32 {
    if passes == 0 {
        DEFAULT_LOOP_GUARD_PASSES
    } else {
        passes
    }
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn resolve_slow_tick_threshold(config_threshold: Duration) -> Duration {
    match env::var(SLOW_TICK_ENV_VAR) {
        Ok(value) => parse_slow_tick_ms(&value).unwrap_or_else(|| {
            warn!(
                env_var = SLOW_TICK_ENV_VAR,
                value = value.as_str(),
                "invalid slow-tick env var value; falling back to config"
            );
            config_threshold
        }),
        Err(env::VarError::NotPresent) => config_threshold,
        Err(err) => {
            warn!(
                env_var = SLOW_TICK_ENV_VAR,
                error = %err,
                "unable to read slow-tick env var; falling back to config"
            );
            config_threshold
        }
    }
}

fn parse_slow_tick_ms(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}
