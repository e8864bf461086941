use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::blob::{BlobStore, fetch_with_retry};
use crate::config::RotationOptions;
use crate::error::FrameError;
use crate::events::RotationCommand;
use crate::model::{CandidateSet, ImageRecord};
use crate::processing::compose::Composer;
use crate::retry::RetryPolicy;
use crate::selector::Selector;
use crate::sink::DisplaySink;
use crate::store::{CatalogStore, DisplayLogStore};

/// Where the loop is within today's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Idle,
    Cycling { index: usize },
}

impl RotationState {
    pub fn for_set(set: &CandidateSet) -> Self {
        if set.is_empty() {
            Self::Idle
        } else {
            Self::Cycling { index: 0 }
        }
    }

    /// Next position, wrapping around a list of `len` entries.
    pub fn advance(self, len: usize) -> Self {
        match self {
            Self::Cycling { index } if len > 0 => Self::Cycling {
                index: (index + 1) % len,
            },
            _ => Self::Idle,
        }
    }
}

/// Source of the local calendar date.
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

/// Wall clock read in the frame's configured timezone.
#[derive(Debug, Clone, Copy)]
pub struct ZonedClock(pub Tz);

impl Clock for ZonedClock {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.0).date_naive()
    }
}

/// Settable date for `--today` and tests.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<NaiveDate>>);

impl ManualClock {
    pub fn new(date: NaiveDate) -> Self {
        Self(Arc::new(Mutex::new(date)))
    }

    pub fn set(&self, date: NaiveDate) {
        if let Ok(mut current) = self.0.lock() {
            *current = date;
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        match self.0.lock() {
            Ok(date) => *date,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No candidates for today; wait for the idle retry.
    Idle,
    /// This image is now on the display.
    Shown { image_id: String },
    /// Every candidate failed to fetch or compose this tick.
    NothingShown,
    /// The display rejected the frame; the previous one stays up.
    SinkFailed,
}

/// Everything one rotation tick needs, injected by the caller.
pub struct Rotation<C, L, B, S, K> {
    selector: Selector<C, L>,
    blobs: B,
    composer: Composer,
    sink: S,
    clock: K,
    retry: RetryPolicy,
    options: RotationOptions,
    resolution: (u32, u32),
    candidates: CandidateSet,
    state: RotationState,
    current_day: Option<NaiveDate>,
}

impl<C, L, B, S, K> Rotation<C, L, B, S, K>
where
    C: CatalogStore,
    L: DisplayLogStore,
    B: BlobStore + Sync,
    S: DisplaySink,
    K: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: Selector<C, L>,
        blobs: B,
        composer: Composer,
        sink: S,
        clock: K,
        retry: RetryPolicy,
        options: RotationOptions,
        resolution: (u32, u32),
    ) -> Self {
        Self {
            selector,
            blobs,
            composer,
            sink,
            clock,
            retry,
            options,
            resolution,
            candidates: CandidateSet::empty(),
            state: RotationState::Idle,
            current_day: None,
        }
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn selector(&self) -> &Selector<C, L> {
        &self.selector
    }

    /// Reorders the current candidates in place and restarts from the first,
    /// without asking the catalog again.
    pub fn shuffle(&mut self) {
        self.selector.reshuffle(&mut self.candidates);
        self.state = RotationState::for_set(&self.candidates);
        info!(count = self.candidates.len(), "candidates reshuffled");
    }

    /// Runs one tick: reselect on a new day (or while idle), then show the
    /// current candidate and advance.
    pub async fn step(&mut self) -> CycleOutcome {
        let today = self.clock.today();
        if self.current_day != Some(today) {
            info!(%today, "calendar day changed; selecting candidates");
            self.reselect(today).await;
        } else if self.state == RotationState::Idle {
            debug!(%today, "idle; retrying selection");
            self.reselect(today).await;
        }

        let len = self.candidates.len();
        for _ in 0..len {
            let RotationState::Cycling { index } = self.state else {
                break;
            };
            let record = self.candidates.images[index].clone();
            let outcome = self.show(&record, today).await;
            self.state = self.state.advance(len);
            match outcome {
                Ok(()) => {
                    info!(
                        image_id = %record.id,
                        key = %record.storage_key,
                        index,
                        of = len,
                        "frame shown"
                    );
                    self.record(&record, today).await;
                    return CycleOutcome::Shown {
                        image_id: record.id,
                    };
                }
                Err(err @ FrameError::SinkFailed(_)) => {
                    warn!(image_id = %record.id, error = %err, "display update failed; keeping previous frame");
                    return CycleOutcome::SinkFailed;
                }
                Err(err) => {
                    warn!(image_id = %record.id, error = %err, "skipping candidate");
                }
            }
        }

        if self.state == RotationState::Idle {
            CycleOutcome::Idle
        } else {
            CycleOutcome::NothingShown
        }
    }

    /// How long to wait after a tick with `outcome`.
    pub fn wait_after(&self, outcome: &CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::Idle => self.options.idle_retry,
            _ => self.options.interval,
        }
    }

    /// Drives ticks until `cancel` fires. Waits are cut short by commands.
    #[instrument(name = "rotation", skip_all)]
    pub async fn run(
        mut self,
        mut commands: Receiver<RotationCommand>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut commands_open = true;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.step().await;
            let wait = self.wait_after(&outcome);
            debug!(?outcome, wait = %humantime::format_duration(wait), "tick finished");
            let deadline = Instant::now() + wait;

            select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(deadline) => {}
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(RotationCommand::Shuffle) => self.shuffle(),
                    None => {
                        debug!("command channel closed");
                        commands_open = false;
                        select! {
                            _ = cancel.cancelled() => break,
                            _ = sleep_until(deadline) => {}
                        }
                    }
                },
            }
        }
        info!("rotation loop stopped");
        Ok(())
    }

    async fn reselect(&mut self, today: NaiveDate) {
        self.candidates = self.selector.select_for_today(today).await;
        self.state = RotationState::for_set(&self.candidates);
        self.current_day = Some(today);
    }

    async fn show(&mut self, record: &ImageRecord, today: NaiveDate) -> Result<(), FrameError> {
        let bytes = fetch_with_retry(&self.retry, &self.blobs, &record.storage_key)
            .await
            .map_err(|source| FrameError::FetchFailed {
                key: record.storage_key.clone(),
                source,
            })?;

        // Decode, resize and text rendering are CPU bound; keep them off the
        // async workers. The composer comes back so its font cache survives.
        let mut composer = self.composer.clone();
        let resolution = self.resolution;
        let created = record.creation_date;
        let used_fallback = self.candidates.used_fallback;
        let (composed, composer) = tokio::task::spawn_blocking(move || {
            let frame = composer
                .compose(&bytes, resolution)
                .and_then(|frame| composer.overlay(frame, today, created, used_fallback));
            (frame, composer)
        })
        .await
        .map_err(|err| FrameError::ComposeFailed(format!("compose task failed: {err}")))?;
        self.composer = composer;
        let frame = composed?;

        self.sink.show(&frame).await?;
        Ok(())
    }

    async fn record(&self, record: &ImageRecord, today: NaiveDate) {
        let device_id = self.selector.device_id().as_str();
        if let Err(err) = self
            .selector
            .display_log()
            .record_displayed(&record.id, today, device_id)
            .await
        {
            warn!(image_id = %record.id, error = %err, "failed to record display");
        }
    }
}
