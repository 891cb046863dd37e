//! age.rs
//!
//! Date arithmetic behind the life calendar:
//!     days/weeks lived, days/weeks left, and age in years.
//!
//! The lifespan totals are deliberately flat (`years * 52` weeks and
//! `years * 365` days). They are not calendar accurate and ignore leap
//! years, so a long life "ends" a few weeks early.
//!
//! The calendar-aware breakdown (`age_breakdown`) does borrow from months
//! and years the way a human would count:
//!   • month underflow (borrowing from years)
//!   • day underflow (borrowing from previous month)
//!   • leap years
//!   • varying month lengths

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOTAL_YEARS: u32 = 85;
pub const DEFAULT_WEEKS_PER_YEAR: u32 = 52;
pub const DEFAULT_DAYS_PER_YEAR: u32 = 365;

/// Assumed length of a life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifespan {
    #[serde(default = "default_total_years")]
    pub total_years: u32,
    #[serde(default = "default_weeks_per_year")]
    pub weeks_per_year: u32,
    #[serde(default = "default_days_per_year")]
    pub days_per_year: u32,
}

fn default_total_years() -> u32 {
    DEFAULT_TOTAL_YEARS
}

fn default_weeks_per_year() -> u32 {
    DEFAULT_WEEKS_PER_YEAR
}

fn default_days_per_year() -> u32 {
    DEFAULT_DAYS_PER_YEAR
}

impl Default for Lifespan {
    fn default() -> Self {
        Self {
            total_years: DEFAULT_TOTAL_YEARS,
            weeks_per_year: DEFAULT_WEEKS_PER_YEAR,
            days_per_year: DEFAULT_DAYS_PER_YEAR,
        }
    }
}

impl Lifespan {
    pub fn total_weeks(&self) -> u64 {
        self.total_years as u64 * self.weeks_per_year as u64
    }

    pub fn total_days(&self) -> u64 {
        self.total_years as u64 * self.days_per_year as u64
    }
}

/// Raw counters produced by [`weeks_and_days`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeksAndDays {
    pub weeks_lived: u64,
    pub days_lived: u64,
    pub weeks_left: u64,
    pub days_left: u64,
}

/// Whole days and weeks between `birthdate` and `today`, plus what remains
/// of `lifespan`.
///
/// A birthdate after `today` counts as zero days lived.
pub fn weeks_and_days(birthdate: NaiveDate, today: NaiveDate, lifespan: &Lifespan) -> WeeksAndDays {
    let days_lived = (today - birthdate).num_days().max(0) as u64;
    let weeks_lived = days_lived / 7;

    WeeksAndDays {
        weeks_lived,
        days_lived,
        weeks_left: lifespan.total_weeks().saturating_sub(weeks_lived),
        days_left: lifespan.total_days().saturating_sub(days_lived),
    }
}

/// Age in whole years. Saturates at 0 for birthdates in the future.
pub fn age_years(birthdate: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Age as years, months and days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeBreakdown {
    pub years: i32,
    pub months: i32,
    pub days: i32,
}

impl fmt::Display for AgeBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} year{}, {} month{}, {} day{}",
            self.years,
            plural(self.years),
            self.months,
            plural(self.months),
            self.days,
            plural(self.days)
        )
    }
}

/// Calendar-aware age. Returns all zeros when `birthdate` is after `today`.
pub fn age_breakdown(birthdate: NaiveDate, today: NaiveDate) -> AgeBreakdown {
    if birthdate > today {
        return AgeBreakdown {
            years: 0,
            months: 0,
            days: 0,
        };
    }

    let mut years = today.year() - birthdate.year();
    let mut months = today.month() as i32 - birthdate.month() as i32;
    let mut days = today.day() as i32 - birthdate.day() as i32;

    if days < 0 {
        months -= 1;

        let (prev_year, prev_month) = if today.month() == 1 {
            (today.year() - 1, 12)
        } else {
            (today.year(), today.month() - 1)
        };

        days += days_in_month(prev_year, prev_month) as i32;
    }

    if months < 0 {
        years -= 1;
        months += 12;
    }

    AgeBreakdown {
        years,
        months,
        days,
    }
}

fn plural(n: i32) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Returns number of days in a given year/month (handles leap years)
fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
