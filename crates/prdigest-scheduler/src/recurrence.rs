//! Recurrence calculator — pure next-firing computation.
//!
//! `next_firing` turns a schedule spec and a reference instant into the
//! next absolute instant whose wall-clock reading in the spec's
//! timezone matches the spec. Candidates equal to the reference are
//! rejected (strictly after). An unknown timezone falls back to UTC.
//!
//! DST handling: a local time swallowed by a spring-forward gap
//! resolves to the first valid instant after the gap; a repeated local
//! time in a fall-back fold resolves to its first occurrence.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use prdigest_core::types::{ScheduleKind, ScheduleSpec};

/// Compute the next firing instant strictly after `now`, or None when
/// the schedule has nothing left to fire.
pub fn next_firing(spec: &ScheduleSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz: Tz = spec.timezone.parse().unwrap_or(chrono_tz::UTC);
    let today = now.with_timezone(&tz).date_naive();

    match &spec.kind {
        ScheduleKind::Daily => (0..=2).find_map(|offset| {
            let date = today + Duration::days(offset);
            candidate_after(tz, date, spec.time, now)
        }),

        ScheduleKind::SpecificWeekdays { weekdays } => {
            if weekdays.is_empty() {
                return None;
            }
            (0..7).find_map(|offset| {
                let date = today + Duration::days(offset);
                if !weekdays.contains(&date.weekday()) {
                    return None;
                }
                candidate_after(tz, date, spec.time, now)
            })
        }

        ScheduleKind::FixedInterval { interval_days } => {
            let date = today + Duration::days((*interval_days).max(1) as i64);
            candidate_after(tz, date, spec.time, now)
        }

        ScheduleKind::MonthlyDate { day_of_month } => (0..=13).find_map(|ahead| {
            let (year, month) = add_months(today.year(), today.month(), ahead);
            let day = (*day_of_month).clamp(1, days_in_month(year, month));
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            candidate_after(tz, date, spec.time, now)
        }),

        ScheduleKind::Yearly { month, day } => (0..=8).find_map(|ahead| {
            let date = NaiveDate::from_ymd_opt(today.year() + ahead, *month, *day)?;
            candidate_after(tz, date, spec.time, now)
        }),

        ScheduleKind::OneTime { date } => match date {
            Some(d) if *d > now => Some(*d),
            _ => None,
        },
    }
}

fn candidate_after(
    tz: Tz,
    date: NaiveDate,
    time: NaiveTime,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    resolve_local(tz, date, time).filter(|instant| *instant > now)
}

/// Map a local wall-clock onto an absolute instant, disambiguating DST
/// transitions: folds take the first occurrence, gaps scan forward
/// minute by minute to the first valid instant.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let mut naive = date.and_time(time);
    // No tzdata gap this side of a date-line jump exceeds a few hours.
    for _ in 0..(6 * 60) {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(first, _) => return Some(first.with_timezone(&Utc)),
            LocalResult::None => naive += Duration::minutes(1),
        }
    }
    None
}

fn add_months(year: i32, month: u32, ahead: i32) -> (i32, u32) {
    let zero_based = year * 12 + month as i32 - 1 + ahead;
    (zero_based.div_euclid(12), (zero_based.rem_euclid(12) + 1) as u32)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn spec(kind: ScheduleKind, time: &str, tz: &str) -> ScheduleSpec {
        ScheduleSpec::new(kind, time.parse().unwrap(), tz)
    }

    #[test]
    fn test_weekdays_in_new_york() {
        let s = spec(
            ScheduleKind::SpecificWeekdays {
                weekdays: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
            },
            "09:00:00",
            "America/New_York",
        );
        let next = next_firing(&s, utc("2024-06-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-06-03T13:00:00Z"));
    }

    #[test]
    fn test_daily_resolves_past_dst_gap() {
        // 02:30 local does not exist on 2024-03-10 in New York; the
        // first valid instant after the gap is 03:00 EDT.
        let s = spec(ScheduleKind::Daily, "02:30:00", "America/New_York");
        let next = next_firing(&s, utc("2024-03-10T06:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-03-10T07:00:00Z"));
    }

    #[test]
    fn test_fold_takes_first_occurrence() {
        // 01:30 local happens twice on 2024-11-03 in New York; the
        // first occurrence is still on EDT (UTC-4).
        let s = spec(ScheduleKind::Daily, "01:30:00", "America/New_York");
        let next = next_firing(&s, utc("2024-11-03T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-11-03T05:30:00Z"));
    }

    #[test]
    fn test_daily_fires_later_today_when_still_ahead() {
        let s = spec(ScheduleKind::Daily, "09:00:00", "Asia/Kolkata");
        // 02:00 UTC = 07:30 IST, so 09:00 IST today (03:30 UTC) is ahead.
        let next = next_firing(&s, utc("2024-06-01T02:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-06-01T03:30:00Z"));
    }

    #[test]
    fn test_exact_candidate_is_rejected() {
        let s = spec(ScheduleKind::Daily, "09:00:00", "UTC");
        let next = next_firing(&s, utc("2024-06-01T09:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-06-02T09:00:00Z"));
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        let s = spec(ScheduleKind::Daily, "09:00:00", "Not/AZone");
        let next = next_firing(&s, utc("2024-06-01T08:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-06-01T09:00:00Z"));
    }

    #[test]
    fn test_fixed_interval_days_ahead() {
        let s = spec(
            ScheduleKind::FixedInterval { interval_days: 3 },
            "08:00:00",
            "UTC",
        );
        let next = next_firing(&s, utc("2024-06-01T10:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-06-04T08:00:00Z"));
    }

    #[test]
    fn test_monthly_clamps_to_last_day() {
        let s = spec(
            ScheduleKind::MonthlyDate { day_of_month: 31 },
            "09:00:00",
            "UTC",
        );
        let next = next_firing(&s, utc("2024-02-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-02-29T09:00:00Z"));
    }

    #[test]
    fn test_monthly_skips_to_next_month_when_passed() {
        let s = spec(
            ScheduleKind::MonthlyDate { day_of_month: 15 },
            "09:00:00",
            "UTC",
        );
        let next = next_firing(&s, utc("2024-06-20T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-07-15T09:00:00Z"));
    }

    #[test]
    fn test_yearly_occurrence() {
        let s = spec(
            ScheduleKind::Yearly { month: 2, day: 29 },
            "12:00:00",
            "UTC",
        );
        // Feb 29 only exists in leap years; 2025-2027 are skipped.
        let next = next_firing(&s, utc("2024-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2028-02-29T12:00:00Z"));
    }

    #[test]
    fn test_one_time_semantics() {
        let future = utc("2024-07-01T09:00:00Z");
        let s = spec(
            ScheduleKind::OneTime { date: Some(future) },
            "09:00:00",
            "UTC",
        );
        assert_eq!(next_firing(&s, utc("2024-06-01T00:00:00Z")), Some(future));
        assert_eq!(next_firing(&s, future), None, "equal instant is not after");
        assert_eq!(next_firing(&s, utc("2024-08-01T00:00:00Z")), None);

        let blank = spec(ScheduleKind::OneTime { date: None }, "09:00:00", "UTC");
        assert_eq!(next_firing(&blank, utc("2024-06-01T00:00:00Z")), None);
    }

    #[test]
    fn test_empty_weekday_set_never_fires() {
        let s = spec(
            ScheduleKind::SpecificWeekdays { weekdays: vec![] },
            "09:00:00",
            "UTC",
        );
        assert_eq!(next_firing(&s, utc("2024-06-01T00:00:00Z")), None);
    }

    #[test]
    fn test_successive_firings_increase() {
        let s = spec(ScheduleKind::Daily, "09:00:00", "Asia/Kolkata");
        let mut now = utc("2024-06-01T00:00:00Z");
        let mut previous = now;
        for _ in 0..5 {
            let next = next_firing(&s, now).unwrap();
            assert!(next > previous);
            previous = next;
            now = next;
        }
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 4), 30);
    }

    #[test]
    fn test_add_months_wraps_year() {
        assert_eq!(add_months(2024, 11, 3), (2025, 2));
        assert_eq!(add_months(2024, 1, 0), (2024, 1));
        assert_eq!(add_months(2024, 12, 1), (2025, 1));
    }
}
