use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

/// Minutes in one calendar day.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Truncate a timestamp to the start of its UTC hour.
pub fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Start of the hour following the one `t` falls in.
pub fn next_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_hour(t) + Duration::hours(1)
}

/// UTC calendar day of a timestamp.
pub fn utc_day(t: DateTime<Utc>) -> NaiveDate {
    t.date_naive()
}

/// Whole hours between two hour-aligned timestamps, counting both ends.
pub fn hours_spanned(oldest: DateTime<Utc>, newest: DateTime<Utc>) -> i64 {
    if newest < oldest {
        return 0;
    }
    (truncate_to_hour(newest) - truncate_to_hour(oldest)).num_hours() + 1
}
