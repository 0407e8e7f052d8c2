use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::model::{RecurrenceKind, RecurrenceRule, Weekday};

/// Bound on the day-by-day weekday walk for WEEKLY rules. A base within
/// ~14 weeks of `now` finds its day inside the bound; staler bases take
/// the week-stepping fallback.
const WEEKLY_WALK_LIMIT: u32 = 100;

/// Compute the first occurrence of `rule` strictly after `now`, stepping
/// from `base`.
///
/// Returns `None` when the rule produces nothing: the kind is NONE, or the
/// arithmetic left chrono's representable range. The rule's `end_date` is
/// deliberately not consulted here; the expander owns that check.
///
/// All arithmetic is in UTC, so daylight-saving shifts cannot move or skip
/// occurrences. The time of day is always carried over from `base`.
pub fn next_occurrence(
    rule: &RecurrenceRule,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let interval = rule.interval.max(1);
    match rule.kind {
        RecurrenceKind::None => None,
        RecurrenceKind::Daily => advance_by_days(base, i64::from(interval), now),
        RecurrenceKind::Weekly => {
            if rule.weekdays.is_empty() {
                advance_by_days(base, i64::from(interval) * 7, now)
            } else {
                next_weekly(&rule.weekdays, interval, base, now)
            }
        }
        RecurrenceKind::Monthly => {
            let target_day = rule.day_of_month.unwrap_or_else(|| base.day());
            next_monthly(target_day, interval, base, now)
        }
        RecurrenceKind::Yearly => next_yearly(interval, base, now),
    }
}

/// Step `base` forward in fixed day-sized increments until strictly after
/// `now`. Shared by DAILY and plain (no weekday set) WEEKLY rules.
fn advance_by_days(base: DateTime<Utc>, step_days: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let step = Duration::days(step_days);
    let mut next = base.checked_add_signed(step)?;
    while next <= now {
        next = next.checked_add_signed(step)?;
    }
    Some(next)
}

/// WEEKLY with a weekday set: walk forward one day at a time from `base`,
/// returning the first day that is in the set AND strictly after `now`.
/// The walk ignores `interval`; the set alone decides which days qualify.
///
/// If the walk exhausts its bound (stale base far in the past), fall back
/// to plain week stepping. The fallback advances like every other rule, so
/// the strictly-future postcondition holds on this path too.
fn next_weekly(
    days: &[Weekday],
    interval: u32,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let wanted: Vec<chrono::Weekday> = days.iter().map(|d| d.to_chrono()).collect();

    let mut candidate = base.checked_add_signed(Duration::days(1))?;
    for _ in 0..WEEKLY_WALK_LIMIT {
        if candidate > now && wanted.contains(&candidate.weekday()) {
            return Some(candidate);
        }
        candidate = candidate.checked_add_signed(Duration::days(1))?;
    }

    advance_by_days(base, i64::from(interval) * 7, now)
}

/// MONTHLY: step whole months from `base`, clamping the target day to each
/// candidate month's length. The clamp is recomputed from `target_day` at
/// every step, so a day-31 rule passing through February still lands on the
/// 31st of longer months.
fn next_monthly(
    target_day: u32,
    interval: u32,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut months = interval;
    let mut next = at_month_offset(base, months, target_day)?;
    while next <= now {
        months = months.checked_add(interval)?;
        next = at_month_offset(base, months, target_day)?;
    }
    Some(next)
}

/// YEARLY: same shape as monthly, stepping years. A Feb-29 base clamps to
/// Feb 28 on non-leap years and comes back to the 29th on leap years.
fn next_yearly(interval: u32, base: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let interval = i32::try_from(interval).ok()?;
    let mut years = interval;
    let mut next = at_year_offset(base, years)?;
    while next <= now {
        years = years.checked_add(interval)?;
        next = at_year_offset(base, years)?;
    }
    Some(next)
}

/// The instant `months_ahead` months after `base`, on `target_day` clamped
/// to the candidate month's length, keeping `base`'s time of day.
fn at_month_offset(base: DateTime<Utc>, months_ahead: u32, target_day: u32) -> Option<DateTime<Utc>> {
    let total = base.month0().checked_add(months_ahead)?;
    let year = base.year().checked_add(i32::try_from(total / 12).ok()?)?;
    let month = total % 12 + 1;
    let day = target_day.min(days_in_month(year, month));
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, base.time()),
        Utc,
    ))
}

/// The instant `years_ahead` years after `base`, with the day clamped to
/// the target month's length in that year.
fn at_year_offset(base: DateTime<Utc>, years_ahead: i32) -> Option<DateTime<Utc>> {
    let year = base.year().checked_add(years_ahead)?;
    let day = base.day().min(days_in_month(year, base.month()));
    let date = NaiveDate::from_ymd_opt(year, base.month(), day)?;
    Some(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, base.time()),
        Utc,
    ))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
