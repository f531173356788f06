// # Posting Period
//
// A digest keeps editing the same message while it stays inside one period
// and starts a fresh message once the period rolls over:
//
// ```text
// NEW ── send ──▶ SENT(messageId) ── edit ──▶ EDITED* ── period boundary ──▶ NEW
// ```

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Rollover cadence of a log family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Period {
    /// Every post is a new message (event feeds)
    Never,
    /// Days starting at `reset_hour_utc` (legend league days reset at 05:00 UTC)
    Daily { reset_hour_utc: u32 },
    /// Calendar months in UTC
    Monthly,
    /// One message, edited for as long as it exists
    Forever,
}

impl Period {
    /// Whether `a` and `b` fall into the same period
    pub fn same_period(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        match self {
            Period::Never => false,
            Period::Forever => true,
            Period::Daily { reset_hour_utc } => {
                let shift = Duration::hours(i64::from(*reset_hour_utc));
                (a - shift).date_naive() == (b - shift).date_naive()
            }
            Period::Monthly => a.year() == b.year() && a.month() == b.month(),
        }
    }

    /// Start of the period containing `t`, if the period has bounds
    pub fn period_start(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::Never | Period::Forever => None,
            Period::Daily { reset_hour_utc } => {
                let shift = Duration::hours(i64::from(*reset_hour_utc));
                let day = (t - shift).date_naive();
                day.and_hms_opt(0, 0, 0)
                    .map(|midnight| Utc.from_utc_datetime(&midnight) + shift)
            }
            Period::Monthly => Utc
                .with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
                .single(),
        }
    }

    /// Whether a message posted at `posted_at` may still be edited at `now`
    pub fn allows_edit(&self, posted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.same_period(posted_at, now)
    }
}
