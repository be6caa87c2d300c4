//! Calendar windows for date-bucketed aggregates.
//!
//! Every window yields exactly one bucket per calendar unit, oldest first,
//! ending with the unit that contains `today`.

use chrono::{Datelike, Duration, NaiveDate};

/// The `days` calendar days ending with `today`.
pub fn day_window(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub_signed(Duration::days(i64::from(back))))
        .collect()
}

/// The `months` calendar months ending with the month of `today`, as
/// `(year, month)` pairs.
pub fn month_window(today: NaiveDate, months: u32) -> Vec<(i32, u32)> {
    (0..months)
        .rev()
        .map(|back| shift_month(today.year(), today.month(), back))
        .collect()
}

/// First day of the month `months_back` months before the month of `today`.
pub fn month_start(today: NaiveDate, months_back: u32) -> Option<NaiveDate> {
    let (year, month) = shift_month(today.year(), today.month(), months_back);
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// `YYYY-MM`
pub fn month_label(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// Parse the date part of an ISO date or datetime string.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn shift_month(year: i32, month: u32, back: u32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 - back as i32;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}
