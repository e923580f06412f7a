use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Half-open interval overlap: `[a_start, a_end)` against `[b_start, b_end)`.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Parses a wall-clock `HH:MM` (seconds tolerated) as sent by the calendar form.
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn at(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    date.and_time(time)
}

pub fn duration_minutes(start: NaiveDateTime, end: NaiveDateTime) -> i32 {
    ((end - start).num_seconds() as f64 / 60.0).round() as i32
}
