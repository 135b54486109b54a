//! Calendar month key for leaderboard buckets.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// `YYYY-MM` of the UTC wall clock.
///
/// Derives `Ord` so that lexical order matches chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, Error> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(Error::validation(format!("invalid month {year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Parse `YYYY-MM`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let invalid = || Error::validation(format!("invalid month key `{s}`, expected YYYY-MM"));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
