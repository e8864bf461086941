use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::DisplayLogEntry;
use crate::store::DisplayLogStore;

/// Repeat-avoidance bookkeeping on top of a [`DisplayLogStore`].
///
/// Assumes a single writer per device (one rotation loop), so the
/// check-then-insert in [`DisplayLog::record_displayed`] cannot race.
#[derive(Debug)]
pub struct DisplayLog<S> {
    store: S,
}

impl<S: DisplayLogStore> DisplayLog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records a showing. Repeating the same `(image, date, device)` is a no-op.
    pub async fn record_displayed(
        &self,
        image_id: &str,
        date: NaiveDate,
        device_id: &str,
    ) -> Result<(), StoreError> {
        let entry = DisplayLogEntry {
            image_id: image_id.to_string(),
            display_date: date,
            device_id: device_id.to_string(),
        };
        if self.store.exists(&entry).await? {
            debug!(image_id, %date, "display already recorded");
            return Ok(());
        }
        self.store.insert(&entry).await?;
        debug!(image_id, %date, "display recorded");
        Ok(())
    }

    /// Whether the image was shown on this device on or after `threshold`.
    /// Store errors answer `false` so an outage cannot starve the fallback path.
    pub async fn was_displayed_since(
        &self,
        image_id: &str,
        threshold: NaiveDate,
        device_id: &str,
    ) -> bool {
        match self
            .store
            .displayed_since(image_id, threshold, device_id)
            .await
        {
            Ok(shown) => shown,
            Err(err) => {
                warn!(image_id, error = %err, "display log lookup failed; treating as not shown");
                false
            }
        }
    }
}
