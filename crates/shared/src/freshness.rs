//! Freshness classification of an expiration date relative to today.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EXPIRING_SOON_WINDOW_DAYS: i64 = 3;
pub const EXPIRATION_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreshnessStatus {
    Expired,
    ExpiringSoon,
    Fresh,
}

impl FreshnessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ExpiringSoon => "expiring-soon",
            Self::Fresh => "fresh",
        }
    }
}

/// Both arguments are calendar dates, so the day difference is already whole.
pub fn classify(expiration_date: NaiveDate, today: NaiveDate) -> FreshnessStatus {
    let diff_days = expiration_date.signed_duration_since(today).num_days();
    if diff_days < 0 {
        FreshnessStatus::Expired
    } else if diff_days <= EXPIRING_SOON_WINDOW_DAYS {
        FreshnessStatus::ExpiringSoon
    } else {
        FreshnessStatus::Fresh
    }
}

/// Classifies against the calendar day of `now` in its own time zone; time of day is discarded.
pub fn classify_at<Tz: TimeZone>(expiration_date: NaiveDate, now: &DateTime<Tz>) -> FreshnessStatus {
    classify(expiration_date, now.date_naive())
}

pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpirationDateError {
    #[error("expiration date is missing")]
    Missing,
    #[error("expiration date '{0}' is not a valid YYYY-MM-DD calendar date")]
    Malformed(String),
}

pub fn parse_expiration_date(raw: &str) -> Result<NaiveDate, ExpirationDateError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ExpirationDateError::Missing);
    }
    NaiveDate::parse_from_str(raw, EXPIRATION_DATE_FORMAT)
        .map_err(|_| ExpirationDateError::Malformed(raw.to_string()))
}
