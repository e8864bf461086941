//! Narrow persistence interfaces consumed by the selector and the display log.
//!
//! The catalog is owned elsewhere and only read. The display log schema is
//! owned by this crate, but the rows live in the same external database.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::model::{DisplayLogEntry, ImageRecord, MonthDay};

pub mod memory;
pub mod postgres;

pub trait CatalogStore {
    /// Records created on `key` in any year, newest first. Records without a
    /// storage key are never returned.
    fn query_by_month_day(
        &self,
        key: MonthDay,
    ) -> impl Future<Output = Result<Vec<ImageRecord>, StoreError>> + Send;
}

pub trait DisplayLogStore {
    fn exists(
        &self,
        entry: &DisplayLogEntry,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn insert(&self, entry: &DisplayLogEntry)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Whether `device_id` showed `image_id` on or after `threshold`.
    fn displayed_since(
        &self,
        image_id: &str,
        threshold: NaiveDate,
        device_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

impl<T: CatalogStore + Send + Sync> CatalogStore for Arc<T> {
    fn query_by_month_day(
        &self,
        key: MonthDay,
    ) -> impl Future<Output = Result<Vec<ImageRecord>, StoreError>> + Send {
        (**self).query_by_month_day(key)
    }
}

impl<T: DisplayLogStore + Send + Sync> DisplayLogStore for Arc<T> {
    fn exists(
        &self,
        entry: &DisplayLogEntry,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        (**self).exists(entry)
    }

    fn insert(&self, entry: &DisplayLogEntry) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).insert(entry)
    }

    fn displayed_since(
        &self,
        image_id: &str,
        threshold: NaiveDate,
        device_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        (**self).displayed_since(image_id, threshold, device_id)
    }
}
