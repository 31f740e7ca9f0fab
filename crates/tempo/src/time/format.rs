use super::source::{Ticks, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};

const SECONDS_PER_DAY: Ticks = 24 * 60 * 60;
const TICKS_PER_DAY: Ticks = SECONDS_PER_DAY * TICKS_PER_SECOND;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GameTime {
    pub milliseconds: i64,
}

impl GameTime {
    pub fn from_ticks(ticks: Ticks) -> Self {
        Self {
            milliseconds: ticks / TICKS_PER_MILLISECOND,
        }
    }

    pub fn seconds(&self) -> f32 {
        self.milliseconds as f32 * 0.001
    }
}

const DAYS_IN_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Renders game ticks on a calendar that starts at year 0, month 1, day 1.
/// `Day` is the day of the month; the month itself is not printed.
pub fn format_game_time(ticks: Ticks) -> String {
    let ticks = ticks.max(0);
    let mut remaining_days = ticks / TICKS_PER_DAY;

    let mut year: i64 = 0;
    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < year_len {
            break;
        }
        remaining_days -= year_len;
        year += 1;
    }

    for (index, &common_len) in DAYS_IN_MONTH.iter().enumerate() {
        let month_len = if index == 1 && is_leap_year(year) {
            29
        } else {
            common_len
        };
        if remaining_days < month_len {
            break;
        }
        remaining_days -= month_len;
    }

    let seconds_of_day = (ticks % TICKS_PER_DAY) / TICKS_PER_SECOND;
    let hour = seconds_of_day / 3600;
    let minute = (seconds_of_day / 60) % 60;
    let second = seconds_of_day % 60;

    format!(
        "Year {year} Day {:03} Time {hour:02}:{minute:02}:{second:02}",
        remaining_days + 1
    )
}

fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}
