use crate::error::{ReportError, Result};
use crate::schema::DateRange;
use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a monetary amount to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Label used to group tax by rate, e.g. `0.16` -> `"16%"`.
pub fn rate_label(rate: Decimal) -> String {
    format!("{}%", (rate * Decimal::ONE_HUNDRED).normalize())
}

pub fn first_day_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .unwrap_or(NaiveDate::MAX)
}

/// Shifts a (year, month) pair by `delta` months.
pub fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) + delta;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// The full calendar month containing `date`.
pub fn month_range(date: NaiveDate) -> DateRange {
    DateRange {
        start: first_day_of_month(date.year(), date.month()),
        end: last_day_of_month(date.year(), date.month()),
    }
}

/// The full calendar month `delta` months away from the one containing `date`.
pub fn shifted_month_range(date: NaiveDate, delta: i32) -> DateRange {
    let (year, month) = shift_month(date.year(), date.month(), delta);
    DateRange {
        start: first_day_of_month(year, month),
        end: last_day_of_month(year, month),
    }
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Day `day` of the month following `period_end`, clamped to that month's last day.
pub fn filing_deadline(period_end: NaiveDate, day: u32) -> NaiveDate {
    let (year, month) = shift_month(period_end.year(), period_end.month(), 1);
    let last = last_day_of_month(year, month);
    NaiveDate::from_ymd_opt(year, month, day.min(last.day())).unwrap_or(last)
}

/// The last day strictly before `date`, or `None` at the calendar floor.
pub fn day_before(date: NaiveDate) -> Option<NaiveDate> {
    date.pred_opt()
}

pub fn parse_iso_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ReportError::Date(format!(
            "Invalid date: {}. Expected YYYY-MM-DD",
            value.trim()
        ))
    })
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM" into the
/// inclusive range of whole months it covers.
pub fn parse_period_string(period: &str) -> Result<DateRange> {
    let parts: Vec<&str> = period.split(':').collect();

    let parse_month = |part: &str, which: &str| -> Result<NaiveDate> {
        let with_day = format!("{}-01", part.trim());
        NaiveDate::parse_from_str(&with_day, "%Y-%m-%d").map_err(|_| {
            ReportError::Date(format!(
                "Invalid {} month in period: {}. Expected YYYY-MM",
                which, part
            ))
        })
    };

    match parts.len() {
        1 => {
            let start = parse_month(parts[0], "start")?;
            let end = last_day_of_month(start.year(), start.month());
            DateRange::new(start, end)
        }
        2 => {
            let start = parse_month(parts[0], "start")?;
            let end_ref = parse_month(parts[1], "end")?;
            let end = last_day_of_month(end_ref.year(), end_ref.month());
            DateRange::new(start, end)
        }
        _ => Err(ReportError::Date(format!(
            "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
            period
        ))),
    }
}
