//! Pure clock/calendar predicates. All time arrives from the caller; nothing
//! here reads a real clock, so every function is deterministic.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};

use crate::config::{PeakHours, SeasonWindow};

/// Night-discount window, [22:00, 06:00), wrapping midnight.
pub const NIGHT_START_HOUR: u32 = 22;
pub const NIGHT_END_HOUR: u32 = 6;

pub fn is_night_hour(hour: u32) -> bool {
    hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR
}

/// Whether `month` falls inside the billing season. A wrapped window
/// (e.g. November through March) covers the year boundary.
pub fn in_peak_season(month: u32, season: Option<&SeasonWindow>) -> bool {
    match season {
        None => true,
        Some(window) => {
            if window.start_month <= window.end_month {
                (window.start_month..=window.end_month).contains(&month)
            } else {
                month >= window.start_month || month <= window.end_month
            }
        }
    }
}

pub fn is_weekday(weekday: Weekday) -> bool {
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Whether an hour on a given weekday is billed.
pub fn in_peak_hours(hour: u32, weekday: Weekday, peak: &PeakHours) -> bool {
    if peak.weekdays_only && !is_weekday(weekday) {
        return false;
    }
    peak.start_hour <= hour && hour < peak.end_hour
}

/// Wrap-aware gap between consecutive hour markers, in hours (mod 24).
pub fn hour_gap(from_hour: u32, to_hour: u32) -> u32 {
    (to_hour + 24 - from_hour) % 24
}

/// Hours from `now` until the next qualifying peak-window start.
///
/// With weekday-only billing, weekend days are skipped entirely (Friday
/// evening jumps to Monday morning). Floored at 0.5 h so anticipatory
/// charge rates stay bounded.
pub fn hours_until_peak_start(now: DateTime<FixedOffset>, peak: &PeakHours) -> f64 {
    let now_frac =
        f64::from(now.hour()) + f64::from(now.minute()) / 60.0 + f64::from(now.second()) / 3600.0;
    let start = f64::from(peak.start_hour);

    let qualifies = |weekday: Weekday| !peak.weekdays_only || is_weekday(weekday);

    let hours = if qualifies(now.weekday()) && now_frac < start {
        start - now_frac
    } else {
        // Walk forward day by day; at most a week away.
        let mut days_ahead = 1;
        let mut weekday = now.weekday().succ();
        while !qualifies(weekday) {
            days_ahead += 1;
            weekday = weekday.succ();
        }
        (24.0 - now_frac) + f64::from(days_ahead - 1) * 24.0 + start
    };
    hours.max(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    const PEAK: PeakHours = PeakHours { start_hour: 7, end_hour: 20, weekdays_only: true };

    #[rstest]
    #[case(22, true)]
    #[case(23, true)]
    #[case(0, true)]
    #[case(5, true)]
    #[case(6, false)]
    #[case(21, false)]
    fn test_night_window(#[case] hour: u32, #[case] expected: bool) {
        assert_eq!(is_night_hour(hour), expected);
    }

    #[test]
    fn test_season_wrapping() {
        let winter = SeasonWindow { start_month: 11, end_month: 3 };
        assert!(in_peak_season(11, Some(&winter)));
        assert!(in_peak_season(1, Some(&winter)));
        assert!(in_peak_season(3, Some(&winter)));
        assert!(!in_peak_season(4, Some(&winter)));
        assert!(!in_peak_season(10, Some(&winter)));
    }

    #[test]
    fn test_season_plain_and_absent() {
        let summer = SeasonWindow { start_month: 6, end_month: 8 };
        assert!(in_peak_season(7, Some(&summer)));
        assert!(!in_peak_season(5, Some(&summer)));
        assert!(in_peak_season(12, None));
    }

    #[test]
    fn test_peak_hours_weekday_gate() {
        // 2026-01-05 is a Monday, 2026-01-10 a Saturday.
        assert!(in_peak_hours(8, Weekday::Mon, &PEAK));
        assert!(!in_peak_hours(8, Weekday::Sat, &PEAK));
        assert!(!in_peak_hours(20, Weekday::Mon, &PEAK));
        assert!(!in_peak_hours(6, Weekday::Mon, &PEAK));
    }

    #[test]
    fn test_predicates_are_idempotent() {
        let winter = SeasonWindow { start_month: 11, end_month: 3 };
        for _ in 0..2 {
            assert!(in_peak_season(12, Some(&winter)));
            assert!(in_peak_hours(9, Weekday::Wed, &PEAK));
        }
    }

    #[test]
    fn test_hour_gap_wraps() {
        assert_eq!(hour_gap(10, 13), 3);
        assert_eq!(hour_gap(23, 1), 2);
        assert_eq!(hour_gap(5, 5), 0);
    }

    #[test]
    fn test_hours_until_peak_same_day() {
        // Monday 05:00, window starts 07:00.
        let now = at(2026, 1, 5, 5, 0);
        assert!((hours_until_peak_start(now, &PEAK) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_hours_until_peak_next_day() {
        // Monday 09:00 (inside the window): next start is Tuesday 07:00.
        let now = at(2026, 1, 5, 9, 0);
        assert!((hours_until_peak_start(now, &PEAK) - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_hours_until_peak_skips_weekend() {
        // Friday 2026-01-09 at 21:00: next qualifying start is Monday 07:00.
        let now = at(2026, 1, 9, 21, 0);
        let expected = 3.0 + 2.0 * 24.0 + 7.0;
        assert!((hours_until_peak_start(now, &PEAK) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_hours_until_peak_floor() {
        // Monday 06:59: raw distance is under the half-hour floor.
        let now = at(2026, 1, 5, 6, 59);
        assert_eq!(hours_until_peak_start(now, &PEAK), 0.5);
    }
}
