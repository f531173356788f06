// # Activation Windows
//
// Some pull families only change during a recurring event (clan games run
// from the 22nd to the 28th of each month). Outside the window their
// scheduler only polls for the window to open.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::config::MonthlyWindowConfig;

/// Recurring window gating a scheduler's steady-state ticks
pub trait ActivationWindow: Send + Sync {
    /// Whether steady-state ticking is allowed at `now`
    fn is_open(&self, now: DateTime<Utc>) -> bool;
}

/// Window recurring every month between two (day, hour) bounds in UTC
///
/// The start bound is inclusive, the end bound exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyWindow {
    start: (u32, u32),
    end: (u32, u32),
}

impl MonthlyWindow {
    pub fn new(config: &MonthlyWindowConfig) -> Self {
        Self {
            start: (config.start_day, config.start_hour),
            end: (config.end_day, config.end_hour),
        }
    }

    pub fn clan_games() -> Self {
        Self::new(&MonthlyWindowConfig::clan_games())
    }
}

impl ActivationWindow for MonthlyWindow {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        let at = (now.day(), now.hour());
        at >= self.start && at < self.end
    }
}
