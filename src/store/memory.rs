//! In-process stores. Used by tests and by `--select-dry-run` previews.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;

use super::{CatalogStore, DisplayLogStore};
use crate::error::StoreError;
use crate::model::{DisplayLogEntry, ImageRecord, MonthDay};

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: Vec<ImageRecord>,
    failing: Mutex<HashSet<MonthDay>>,
}

impl MemoryCatalog {
    pub fn new(records: Vec<ImageRecord>) -> Self {
        Self {
            records,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every query for `key` fail as if the database were unreachable.
    pub fn fail_on(&self, key: MonthDay) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }
}

impl CatalogStore for MemoryCatalog {
    async fn query_by_month_day(&self, key: MonthDay) -> Result<Vec<ImageRecord>, StoreError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            return Err(StoreError::Unavailable(format!(
                "simulated outage for {key}"
            )));
        }
        let mut matches: Vec<ImageRecord> = self
            .records
            .iter()
            .filter(|r| !r.storage_key.trim().is_empty() && key.matches(r.creation_date))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        Ok(matches)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDisplayLog {
    entries: Mutex<Vec<DisplayLogEntry>>,
    failing: AtomicBool,
}

impl MemoryDisplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<DisplayLogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<DisplayLogEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl DisplayLogStore for MemoryDisplayLog {
    async fn exists(&self, entry: &DisplayLogEntry) -> Result<bool, StoreError> {
        self.check()?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().any(|e| e == entry))
    }

    async fn insert(&self, entry: &DisplayLogEntry) -> Result<(), StoreError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    async fn displayed_since(
        &self,
        image_id: &str,
        threshold: NaiveDate,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().any(|e| {
            e.image_id == image_id && e.device_id == device_id && e.display_date >= threshold
        }))
    }
}
