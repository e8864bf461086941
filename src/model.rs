use std::fmt;

use chrono::{Datelike, NaiveDate};

/// Immutable catalog entry. Owned by the catalog store; read-only here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Locates the raw bytes in blob storage. Never empty.
    pub storage_key: String,
    pub id: String,
    pub display_name: String,
    pub creation_date: NaiveDate,
}

/// One past showing of an image on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayLogEntry {
    pub image_id: String,
    pub display_date: NaiveDate,
    pub device_id: String,
}

/// Ordered images to cycle through for the current day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    pub images: Vec<ImageRecord>,
    /// True when the images come from a prior day rather than today's month-day.
    pub used_fallback: bool,
}

impl CandidateSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }
}

/// Year-independent calendar key used to find "on this day" matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        // 2000 is a leap year, so Feb 29 is accepted.
        NaiveDate::from_ymd_opt(2000, month, day).map(|_| Self { month, day })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        date.month() == self.month && date.day() == self.day
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}
