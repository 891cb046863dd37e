//! Parsing of user-typed birthdates.
//!
//! Input is day-first. Accepted shapes:
//!   • `15.03.2000`, `15/3/2000`, `15-03-2000`, `15 03 2000`
//!   • two-digit years (`15.03.00`), placed in the latest century that does
//!     not put the date after today
//!   • compact `15032000`
//!   • ISO `2000-03-15` (a leading four-digit group means year first)

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BirthdateError {
    #[error("no date given")]
    Empty,
    #[error("could not read '{0}' as a day-first date")]
    Format(String),
    #[error("{day:02}.{month:02}.{year} is not a calendar date")]
    NotACalendarDate { day: u32, month: u32, year: i32 },
    #[error("{0} is in the future")]
    InFuture(NaiveDate),
}

/// Parses `input` relative to `today`, rejecting dates after `today`.
pub fn parse_birthdate(input: &str, today: NaiveDate) -> Result<NaiveDate, BirthdateError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(BirthdateError::Empty);
    }

    let groups: Vec<&str> = input
        .split(|c: char| matches!(c, '.' | '/' | '-' | ' ' | ',' | '\t'))
        .filter(|g| !g.is_empty())
        .collect();

    if groups.iter().any(|g| !g.chars().all(|c| c.is_ascii_digit())) {
        return Err(BirthdateError::Format(input.to_string()));
    }

    let (day, month, year) = match groups.as_slice() {
        [compact] if compact.len() == 8 => (&compact[0..2], &compact[2..4], &compact[4..8]),
        [year, month, day] if year.len() == 4 => (*day, *month, *year),
        [day, month, year] => (*day, *month, *year),
        _ => return Err(BirthdateError::Format(input.to_string())),
    };

    let day: u32 = parse_number(day, input)?;
    let month: u32 = parse_number(month, input)?;
    let year = match year.len() {
        2 => expand_two_digit_year(parse_number(year, input)?, month, day, today),
        4 => parse_number(year, input)?,
        _ => return Err(BirthdateError::Format(input.to_string())),
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(BirthdateError::NotACalendarDate { day, month, year })?;

    if date > today {
        return Err(BirthdateError::InFuture(date));
    }

    Ok(date)
}

fn parse_number<T: std::str::FromStr>(group: &str, input: &str) -> Result<T, BirthdateError> {
    if group.is_empty() || group.len() > 4 {
        return Err(BirthdateError::Format(input.to_string()));
    }
    group
        .parse()
        .map_err(|_| BirthdateError::Format(input.to_string()))
}

// The full date decides: `21.03.24` read on 2024-03-20 is 1924. A day that
// does not exist in the current century keeps that year so the error names it.
fn expand_two_digit_year(yy: i32, month: u32, day: u32, today: NaiveDate) -> i32 {
    let century = today.year() - today.year().rem_euclid(100);
    let year = century + yy;
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) if date > today => year - 100,
        None if year > today.year() => year - 100,
        _ => year,
    }
}
