use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Outcome of one attempt of a retried operation.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Ok(T),
    Retryable(E),
    Fatal(E),
}

impl<T, E> Attempt<T, E> {
    pub fn into_result(self) -> std::result::Result<T, E> {
        match self {
            Attempt::Ok(value) => Ok(value),
            Attempt::Retryable(err) | Attempt::Fatal(err) => Err(err),
        }
    }
}

/// Bounded exponential backoff shared by catalog connects and blob fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    /// The last outcome is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Attempt<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Attempt::Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Attempt::Ok(value);
                }
                Attempt::Fatal(err) => {
                    warn!(label, attempt, error = %err, "giving up on non-retryable error");
                    return Attempt::Fatal(err);
                }
                Attempt::Retryable(err) if attempt >= max => {
                    warn!(label, attempt, error = %err, "retries exhausted");
                    return Attempt::Retryable(err);
                }
                Attempt::Retryable(err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_attempts >= 1, "retry.max-attempts must be >= 1");
        ensure!(
            self.multiplier.is_finite() && self.multiplier >= 1.0,
            "retry.multiplier must be >= 1.0"
        );
        ensure!(
            self.max_delay >= self.initial_delay,
            "retry.max-delay must not be shorter than retry.initial-delay"
        );
        Ok(())
    }
}
