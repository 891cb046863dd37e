use chrono::NaiveDate;

use crate::age::{self, Lifespan};

/// Everything the summary message shows for one user on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifeStats {
    pub days_lived: u64,
    pub weeks_lived: u64,
    pub days_left: u64,
    pub weeks_left: u64,
    pub age: u32,
}

impl LifeStats {
    pub fn compute(birthdate: NaiveDate, today: NaiveDate, lifespan: &Lifespan) -> Self {
        let wd = age::weeks_and_days(birthdate, today, lifespan);
        Self {
            days_lived: wd.days_lived,
            weeks_lived: wd.weeks_lived,
            days_left: wd.days_left,
            weeks_left: wd.weeks_left,
            age: age::age_years(birthdate, today),
        }
    }
}

/// Text summary sent by the daily job and by `/weeks`.
pub fn summary_text(
    birthdate: NaiveDate,
    today: NaiveDate,
    stats: &LifeStats,
    lifespan: &Lifespan,
) -> String {
    format!(
        "Hi, today is {today}\n\
         You are {age} years old ({exact})\n\
         Weeks lived: {weeks_lived}\n\
         Days lived: {days_lived}\n\
         Weeks left (of {total_weeks}): {weeks_left}\n\
         Days left (of {total_days}): {days_left}",
        today = today.format("%d.%m.%Y"),
        age = stats.age,
        exact = age::age_breakdown(birthdate, today),
        weeks_lived = stats.weeks_lived,
        days_lived = stats.days_lived,
        total_weeks = lifespan.total_weeks(),
        weeks_left = stats.weeks_left,
        total_days = lifespan.total_days(),
        days_left = stats.days_left,
    )
}

pub fn new_week_caption(weeks_lived: u64) -> String {
    format!("A new week has begun (#{weeks_lived}).\nHere is your updated chart of lived weeks.")
}

pub const CHART_CAPTION: &str = "Your life in weeks";
