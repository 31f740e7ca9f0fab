use std::collections::VecDeque;
use std::time::Duration;

pub(crate) const TICK_STATS_WINDOW_LEN: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickStats {
    pub last_ms: f32,
    pub avg_ms: f32,
    pub max_ms: f32,
    pub samples: usize,
}

/// The most recent tick durations, oldest first.
#[derive(Debug, Default)]
pub(crate) struct TickDurationWindow {
    recent: VecDeque<Duration>,
}

impl TickDurationWindow {
    pub(crate) fn record(&mut self, duration: Duration) {
        if self.recent.len() == TICK_STATS_WINDOW_LEN {
            self.recent.pop_front();
        }
        self.recent.push_back(duration);
    }

    pub(crate) fn snapshot(&self) -> TickStats {
        let Some(&last) = self.recent.back() else {
            return TickStats::default();
        };
        let total: Duration = self.recent.iter().sum();
        let max = self.recent.iter().max().copied().unwrap_or(last);

        TickStats {
            last_ms: as_ms(last),
            avg_ms: as_ms(total) / self.recent.len() as f32,
            max_ms: as_ms(max),
            samples: self.recent.len(),
        }
    }
}

fn as_ms(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1000.0
}
