use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, AppResult};

/// A calendar month, the unit every evaluation and score is keyed by.
///
/// Rendered and parsed as `YYYY-MM`, which is also the prefix of the RFC 3339
/// timestamps stored in the database, so month filters are prefix matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    first_day: NaiveDate,
}

impl Month {
    pub fn new(year: i32, month: u32) -> AppResult<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first_day| Self { first_day })
            .ok_or_else(|| AppError::validation(format!("无效的月份: {year}-{month}")))
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn of_timestamp(timestamp: &DateTime<Utc>) -> Self {
        Self::of(timestamp.date_naive())
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        Self::of_timestamp(timestamp) == *self
    }

    /// `YYYY-MM`, the storage key.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year(), self.month())
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Month {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (year, month) = raw
            .split_once('-')
            .ok_or_else(|| AppError::validation(format!("月份格式应为 YYYY-MM: {raw}")))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| AppError::validation(format!("无效的年份: {raw}")))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| AppError::validation(format!("无效的月份: {raw}")))?;
        Month::new(year, month)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
