//! Read-time derivation of KPI progress figures.
//!
//! Nothing here is persisted: current value, percentage and health status are
//! recomputed from the progress records every time a KPI is served.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

const DAY_MS: f64 = 86_400_000.0;

/// Days before the end date at which a KPI starts showing as `warning`.
pub const WARNING_WINDOW_DAYS: i64 = 7;

/// Grace period after the end date beyond which estimates are clamped.
const ESTIMATE_CAP_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiHealth {
    Success,
    Danger,
    Warning,
    Normal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiStats {
    pub current_value: f64,
    pub progress_percentage: f64,
    pub remaining_days: i64,
    pub status: KpiHealth,
    pub velocity: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineAlert {
    Upcoming { remaining_days: i64 },
    Overdue { days_late: i64 },
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn ceil_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    ((to - from).num_milliseconds() as f64 / DAY_MS).ceil() as i64
}

pub fn remaining_days(end_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    ceil_days(now, start_of_day(end_date))
}

/// Raw percentage; may exceed 100 when the target is overshot.
pub fn raw_percentage(current_value: f64, target_value: f64) -> f64 {
    if target_value > 0.0 {
        current_value / target_value * 100.0
    } else {
        0.0
    }
}

pub fn classify(progress_percentage: f64, remaining_days: i64) -> KpiHealth {
    if progress_percentage >= 100.0 {
        KpiHealth::Success
    } else if remaining_days < 0 {
        KpiHealth::Danger
    } else if remaining_days <= WARNING_WINDOW_DAYS || progress_percentage < 50.0 {
        KpiHealth::Warning
    } else {
        KpiHealth::Normal
    }
}

pub fn derive_stats(
    target_value: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    current_value: f64,
    now: DateTime<Utc>,
) -> KpiStats {
    let remaining = remaining_days(end_date, now);
    let percentage = raw_percentage(current_value, target_value);
    let status = classify(percentage, remaining);

    let elapsed_days = ceil_days(start_of_day(start_date), now).max(1);
    let velocity = current_value / elapsed_days as f64;

    let end = start_of_day(end_date);
    let estimated_completion = if velocity > 0.0 && current_value < target_value {
        let days_to_complete = ((target_value - current_value) / velocity).ceil();
        let cap = end + Duration::days(ESTIMATE_CAP_DAYS);
        let days_until_cap = (cap - now).num_milliseconds() as f64 / DAY_MS;

        if days_to_complete > days_until_cap {
            Some(end)
        } else {
            Some(now + Duration::days(days_to_complete as i64))
        }
    } else if current_value == 0.0 && remaining > 0 {
        Some(end)
    } else {
        None
    };

    KpiStats {
        current_value,
        progress_percentage: percentage.min(100.0),
        remaining_days: remaining,
        status,
        velocity,
        estimated_completion,
    }
}

/// Which deadline reminder, if any, an active KPI should trigger on a check.
pub fn deadline_alert(remaining_days: i64) -> Option<DeadlineAlert> {
    if remaining_days > 0 && remaining_days <= WARNING_WINDOW_DAYS {
        Some(DeadlineAlert::Upcoming { remaining_days })
    } else if remaining_days < 0 {
        Some(DeadlineAlert::Overdue {
            days_late: -remaining_days,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn remaining_days_rounds_partial_days_up() {
        let now = noon(2024, 3, 1);
        assert_eq!(remaining_days(date(2024, 3, 2), now), 1);
        assert_eq!(remaining_days(date(2024, 3, 11), now), 10);
        assert_eq!(remaining_days(date(2024, 3, 1), now), 0);
        assert_eq!(remaining_days(date(2024, 2, 29), now), -1);
    }

    #[test]
    fn reaching_the_target_wins_over_an_expired_deadline() {
        let stats = derive_stats(100.0, date(2024, 1, 1), date(2024, 2, 1), 120.0, noon(2024, 3, 1));
        assert_eq!(stats.status, KpiHealth::Success);
        assert_eq!(stats.progress_percentage, 100.0);
        assert_eq!(stats.current_value, 120.0);
        assert!(stats.estimated_completion.is_none());
    }

    #[test]
    fn overdue_unfinished_kpi_is_danger() {
        let stats = derive_stats(100.0, date(2024, 1, 1), date(2024, 2, 1), 80.0, noon(2024, 3, 1));
        assert_eq!(stats.status, KpiHealth::Danger);
        assert!(stats.remaining_days < 0);
    }

    #[test]
    fn close_deadline_or_low_progress_is_warning() {
        let now = noon(2024, 3, 1);
        let near = derive_stats(100.0, date(2024, 1, 1), date(2024, 3, 5), 90.0, now);
        assert_eq!(near.status, KpiHealth::Warning);

        let slow = derive_stats(100.0, date(2024, 1, 1), date(2024, 6, 1), 20.0, now);
        assert_eq!(slow.status, KpiHealth::Warning);
    }

    #[test]
    fn healthy_kpi_is_normal() {
        let stats = derive_stats(100.0, date(2024, 1, 1), date(2024, 6, 1), 60.0, noon(2024, 3, 1));
        assert_eq!(stats.status, KpiHealth::Normal);
        assert!((stats.progress_percentage - 60.0).abs() < 1e-9);
    }

    #[test]
    fn zero_target_reports_zero_percent() {
        assert_eq!(raw_percentage(50.0, 0.0), 0.0);
    }

    #[test]
    fn velocity_uses_elapsed_days_with_a_floor_of_one() {
        let now = noon(2024, 1, 11);
        let stats = derive_stats(1000.0, date(2024, 1, 1), date(2024, 12, 31), 110.0, now);
        // 10.5 days elapsed, rounded up to 11
        assert!((stats.velocity - 10.0).abs() < 1e-9);

        let fresh = derive_stats(1000.0, date(2024, 1, 11), date(2024, 12, 31), 5.0, noon(2024, 1, 11));
        assert!((fresh.velocity - 5.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_projects_velocity_forward() {
        let now = noon(2024, 1, 11);
        let stats = derive_stats(200.0, date(2024, 1, 1), date(2024, 12, 31), 110.0, now);
        // velocity 10/day, 90 left -> 9 days
        assert_eq!(stats.estimated_completion, Some(now + Duration::days(9)));
    }

    #[test]
    fn far_estimate_is_clamped_to_end_date() {
        let now = noon(2024, 1, 11);
        let stats = derive_stats(100_000.0, date(2024, 1, 1), date(2024, 1, 20), 11.0, now);
        assert_eq!(stats.estimated_completion, Some(start_of_day(date(2024, 1, 20))));
    }

    #[test]
    fn no_progress_estimates_end_date_only_while_open() {
        let open = derive_stats(100.0, date(2024, 1, 1), date(2024, 6, 1), 0.0, noon(2024, 3, 1));
        assert_eq!(open.estimated_completion, Some(start_of_day(date(2024, 6, 1))));

        let closed = derive_stats(100.0, date(2024, 1, 1), date(2024, 2, 1), 0.0, noon(2024, 3, 1));
        assert!(closed.estimated_completion.is_none());
    }

    #[test]
    fn deadline_alerts_cover_the_week_before_and_after_the_end() {
        assert_eq!(deadline_alert(8), None);
        assert_eq!(deadline_alert(7), Some(DeadlineAlert::Upcoming { remaining_days: 7 }));
        assert_eq!(deadline_alert(1), Some(DeadlineAlert::Upcoming { remaining_days: 1 }));
        assert_eq!(deadline_alert(0), None);
        assert_eq!(deadline_alert(-3), Some(DeadlineAlert::Overdue { days_late: 3 }));
    }
}
