use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::SelectionOptions;
use crate::device::DeviceId;
use crate::display_log::DisplayLog;
use crate::model::{CandidateSet, ImageRecord, MonthDay};
use crate::store::{CatalogStore, DisplayLogStore};

/// Picks the images to cycle through on a given day.
///
/// Rules:
/// - Images created on today's month-day (any year) are returned as-is,
///   newest first, and are never filtered by the display log.
/// - Otherwise walk back one day at a time up to the horizon. On each day keep
///   only images this device has not shown within the repeat window, stop at
///   the cap, and return the first non-empty day shuffled.
/// - Catalog errors count as "nothing on that day"; the walk continues.
pub struct Selector<C, L> {
    catalog: C,
    log: DisplayLog<L>,
    options: SelectionOptions,
    device_id: DeviceId,
    rng: StdRng,
}

impl<C, L> Selector<C, L>
where
    C: CatalogStore,
    L: DisplayLogStore,
{
    pub fn new(catalog: C, log: DisplayLog<L>, options: SelectionOptions, device_id: DeviceId) -> Self {
        let rng = match options.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            catalog,
            log,
            options,
            device_id,
            rng,
        }
    }

    pub fn display_log(&self) -> &DisplayLog<L> {
        &self.log
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub async fn select_for_today(&mut self, today: NaiveDate) -> CandidateSet {
        let todays = self.query_day(MonthDay::of(today)).await;
        if !todays.is_empty() {
            info!(
                %today,
                count = todays.len(),
                "selected images from today's date"
            );
            return CandidateSet {
                images: todays,
                used_fallback: false,
            };
        }

        let threshold = today
            .checked_sub_days(Days::new(u64::from(self.options.repeat_window_days)))
            .unwrap_or(NaiveDate::MIN);

        for offset in 1..=self.options.fallback_horizon_days {
            let Some(day) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            let records = self.query_day(MonthDay::of(day)).await;
            if records.is_empty() {
                continue;
            }

            let mut eligible = Vec::with_capacity(self.options.fallback_cap);
            for record in records {
                if eligible.len() >= self.options.fallback_cap {
                    break;
                }
                if self
                    .log
                    .was_displayed_since(&record.id, threshold, self.device_id.as_str())
                    .await
                {
                    debug!(id = %record.id, %day, "skipping recently shown fallback image");
                    continue;
                }
                eligible.push(record);
            }

            if !eligible.is_empty() {
                eligible.shuffle(&mut self.rng);
                info!(
                    %today,
                    fallback_day = %day,
                    count = eligible.len(),
                    "selected fallback images"
                );
                return CandidateSet {
                    images: eligible,
                    used_fallback: true,
                };
            }
        }

        info!(
            %today,
            horizon_days = self.options.fallback_horizon_days,
            "no images found within fallback horizon"
        );
        CandidateSet::empty()
    }

    /// Reorders an existing set in place without touching the catalog.
    pub fn reshuffle(&mut self, set: &mut CandidateSet) {
        set.images.shuffle(&mut self.rng);
    }

    async fn query_day(&self, key: MonthDay) -> Vec<ImageRecord> {
        match self.catalog.query_by_month_day(key).await {
            Ok(records) => records,
            Err(err) => {
                warn!(month_day = %key, error = %err, "catalog query failed; treating as empty");
                Vec::new()
            }
        }
    }
}
