//! Calendar arithmetic for billing schedules
//!
//! Pure date functions used to place due dates on a billing day, step a
//! schedule forward by its periodicity, and count days relative to a due
//! date. A billing day that does not exist in the target month (the 31st in
//! April, the 29th-31st in February) is clamped to that month's last day.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced by calendar arithmetic
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Invalid billing day {0}: must be between 1 and 31")]
    InvalidBillingDay(u32),

    #[error("Date out of range: {0}")]
    OutOfRange(String),

    #[error("Unknown periodicity: {0}")]
    UnknownPeriodicity(String),
}

/// How often a subscription is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodicity {
    Monthly,
    Bimonthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl Periodicity {
    /// Number of calendar months between two consecutive due dates
    pub fn months(&self) -> u32 {
        match self {
            Periodicity::Monthly => 1,
            Periodicity::Bimonthly => 2,
            Periodicity::Quarterly => 3,
            Periodicity::Semiannual => 6,
            Periodicity::Annual => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Periodicity::Monthly => "monthly",
            Periodicity::Bimonthly => "bimonthly",
            Periodicity::Quarterly => "quarterly",
            Periodicity::Semiannual => "semiannual",
            Periodicity::Annual => "annual",
        }
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Periodicity {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Periodicity::Monthly),
            "bimonthly" => Ok(Periodicity::Bimonthly),
            "quarterly" => Ok(Periodicity::Quarterly),
            "semiannual" => Ok(Periodicity::Semiannual),
            "annual" => Ok(Periodicity::Annual),
            other => Err(CalendarError::UnknownPeriodicity(other.to_string())),
        }
    }
}

/// A calendar month, used as the per-subscription idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The month containing `date`
    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    /// Steps forward by `months` calendar months
    pub fn plus_months(&self, months: u32) -> Self {
        let zero_based = self.year * 12 + (self.month as i32 - 1) + months as i32;
        Self::new(zero_based.div_euclid(12), zero_based.rem_euclid(12) as u32 + 1)
    }

    pub fn next(&self) -> Self {
        self.plus_months(1)
    }

    /// First day of the month
    pub fn first_day(&self) -> Result<NaiveDate, CalendarError> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .ok_or_else(|| CalendarError::OutOfRange(format!("{}", self)))
    }

    /// Last day of the month
    pub fn last_day(&self) -> Result<NaiveDate, CalendarError> {
        let next = self.next().first_day()?;
        next.pred_opt()
            .ok_or_else(|| CalendarError::OutOfRange(format!("{}", self)))
    }

    /// Returns true if `date` falls inside this month
    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::of(date) == *self
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Validates a billing day-of-month
pub fn validate_billing_day(billing_day: u32) -> Result<u32, CalendarError> {
    if (1..=31).contains(&billing_day) {
        Ok(billing_day)
    } else {
        Err(CalendarError::InvalidBillingDay(billing_day))
    }
}

/// Places `day` in the given month, clamping to the month's last day
pub fn clamp_to_month(month: YearMonth, day: u32) -> Result<NaiveDate, CalendarError> {
    let day = validate_billing_day(day)?;
    let last = month.last_day()?;
    let day = day.min(last.day());
    NaiveDate::from_ymd_opt(month.year, month.month, day)
        .ok_or_else(|| CalendarError::OutOfRange(format!("{}-{:02}", month, day)))
}

/// Moves `date` forward by `months` and re-places it on `billing_day`
///
/// Re-clamping from the billing day (not from `date.day()`) keeps a schedule
/// anchored on the 31st from drifting to the 28th after passing February.
pub fn add_months_clamped(
    date: NaiveDate,
    months: u32,
    billing_day: u32,
) -> Result<NaiveDate, CalendarError> {
    clamp_to_month(YearMonth::of(date).plus_months(months), billing_day)
}

/// Due date of the first invoice of a subscription, computed from `today`
///
/// - monthly: this month's billing day, or next month's if it already passed
/// - bimonthly, quarterly, semiannual: today's month plus 2, 3 or 6 months
/// - annual: the same month next year
pub fn next_due_date(
    periodicity: Periodicity,
    billing_day: u32,
    today: NaiveDate,
) -> Result<NaiveDate, CalendarError> {
    let this_month = YearMonth::of(today);
    match periodicity {
        Periodicity::Monthly => {
            let candidate = clamp_to_month(this_month, billing_day)?;
            if candidate < today {
                clamp_to_month(this_month.next(), billing_day)
            } else {
                Ok(candidate)
            }
        }
        other => clamp_to_month(this_month.plus_months(other.months()), billing_day),
    }
}

/// Due date that follows `previous_due` in the subscription's schedule
pub fn following_due_date(
    periodicity: Periodicity,
    billing_day: u32,
    previous_due: NaiveDate,
) -> Result<NaiveDate, CalendarError> {
    add_months_clamped(previous_due, periodicity.months(), billing_day)
}

/// Signed number of days from `today` until `due` (negative once past due)
pub fn days_until(due: NaiveDate, today: NaiveDate) -> i64 {
    (due - today).num_days()
}

/// Number of whole days `due` lies in the past; zero when not yet due
pub fn days_overdue(due: NaiveDate, today: NaiveDate) -> i64 {
    (today - due).num_days().max(0)
}

/// Shifts `date` by a signed number of days
pub fn offset_days(date: NaiveDate, days: i64) -> Result<NaiveDate, CalendarError> {
    let shifted = if days >= 0 {
        date.checked_add_days(chrono::Days::new(days as u64))
    } else {
        date.checked_sub_days(chrono::Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| CalendarError::OutOfRange(format!("{} {:+} days", date, days)))
}

/// The current calendar day in the business timezone
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_monthly_due_this_month_when_not_passed() {
        let due = next_due_date(Periodicity::Monthly, 10, date(2024, 1, 10)).unwrap();
        assert_eq!(due, date(2024, 1, 10));
    }

    #[test]
    fn test_monthly_rolls_to_next_month_when_passed() {
        let due = next_due_date(Periodicity::Monthly, 10, date(2024, 1, 15)).unwrap();
        assert_eq!(due, date(2024, 2, 10));
    }

    #[test]
    fn test_billing_day_31_clamps_to_end_of_february() {
        let due = next_due_date(Periodicity::Monthly, 31, date(2024, 2, 1)).unwrap();
        assert_eq!(due, date(2024, 2, 29));

        let due = next_due_date(Periodicity::Monthly, 31, date(2023, 2, 1)).unwrap();
        assert_eq!(due, date(2023, 2, 28));
    }

    #[test]
    fn test_multi_month_periodicities_from_today() {
        let today = date(2024, 11, 20);
        assert_eq!(next_due_date(Periodicity::Bimonthly, 5, today).unwrap(), date(2025, 1, 5));
        assert_eq!(next_due_date(Periodicity::Quarterly, 5, today).unwrap(), date(2025, 2, 5));
        assert_eq!(next_due_date(Periodicity::Semiannual, 31, today).unwrap(), date(2025, 5, 31));
        assert_eq!(next_due_date(Periodicity::Annual, 29, date(2024, 2, 1)).unwrap(), date(2025, 2, 28));
    }

    #[test]
    fn test_following_due_date_does_not_drift() {
        let jan = date(2024, 1, 31);
        let feb = following_due_date(Periodicity::Monthly, 31, jan).unwrap();
        let mar = following_due_date(Periodicity::Monthly, 31, feb).unwrap();
        assert_eq!(feb, date(2024, 2, 29));
        assert_eq!(mar, date(2024, 3, 31));
    }

    #[test]
    fn test_invalid_billing_day() {
        assert_eq!(
            next_due_date(Periodicity::Monthly, 0, date(2024, 1, 1)),
            Err(CalendarError::InvalidBillingDay(0))
        );
        assert_eq!(
            clamp_to_month(YearMonth::new(2024, 1), 32),
            Err(CalendarError::InvalidBillingDay(32))
        );
    }

    #[test]
    fn test_year_month_arithmetic() {
        let ym = YearMonth::new(2024, 11);
        assert_eq!(ym.plus_months(2), YearMonth::new(2025, 1));
        assert_eq!(ym.plus_months(14), YearMonth::new(2026, 1));
        assert_eq!(ym.to_string(), "2024-11");
        assert!(ym.contains(date(2024, 11, 30)));
        assert!(!ym.contains(date(2024, 12, 1)));
    }

    #[test]
    fn test_day_counts() {
        let due = date(2024, 3, 10);
        assert_eq!(days_until(due, date(2024, 3, 3)), 7);
        assert_eq!(days_until(due, date(2024, 3, 15)), -5);
        assert_eq!(days_overdue(due, date(2024, 3, 15)), 5);
        assert_eq!(days_overdue(due, date(2024, 3, 1)), 0);
    }

    #[test]
    fn test_offset_days() {
        assert_eq!(offset_days(date(2024, 3, 1), -1).unwrap(), date(2024, 2, 29));
        assert_eq!(offset_days(date(2024, 12, 31), 1).unwrap(), date(2025, 1, 1));
    }

    #[test]
    fn test_periodicity_parse() {
        assert_eq!("quarterly".parse::<Periodicity>().unwrap(), Periodicity::Quarterly);
        assert!("weekly".parse::<Periodicity>().is_err());
    }
}
