// Calendar helpers: months, ranges, and the clock

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

/// Today's date (UTC)
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Current timestamp (UTC, naive)
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// Last day of the month containing `date`
pub fn month_end(date: NaiveDate) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    month_end(date).day()
}

/// Chart label such as "Jan 2026"
pub fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

/// Parse an ISO date, tolerating surrounding whitespace
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Parse a timestamp given as a date, `date time`, or `dateTtime`
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// The whole calendar month containing `date`
    pub fn month_of(date: NaiveDate) -> Self {
        DateRange::new(month_start(date), month_end(date))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}
