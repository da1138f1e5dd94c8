//! Bounded retry with exponential backoff, layered over any [`Exporter`].
//!
//! The processor never retries a batch itself; retrying is the exporter's
//! own concern. The processor still abandons any export call that runs past
//! `export_timeout`, so a retry schedule that overruns it loses its last
//! attempt to a `Timeout`. [`RetryConfig::within`] sizes backoff and
//! per-attempt time so the whole schedule fits, and the exporter stops
//! early once the remaining budget cannot hold another attempt.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_retry_bounded;
use crate::exporter::{ExportError, ExportResult, Exporter};
use crate::signal::Batch;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Backoff schedule for [`RetryingExporter`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first; 0 disables retrying.
    pub max_retries: u32,
    /// Pause before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single pause.
    pub max_delay: Duration,
    /// Growth factor between successive pauses.
    pub backoff_multiplier: f64,
    /// Time available to the whole schedule, first attempt included.
    /// `None` leaves the schedule unbounded.
    pub budget: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            budget: None,
        }
    }
}

impl RetryConfig {
    /// Schedule for `max_retries` retries that completes inside `budget`.
    ///
    /// Backoff takes at most half of the budget; the rest is split evenly
    /// between attempts by [`attempt_timeout`](Self::attempt_timeout).
    pub fn within(budget: Duration, max_retries: u32) -> Self {
        let max_delay = budget / 2 / max_retries.max(1);
        Self {
            max_retries,
            initial_delay: (budget / 10).min(max_delay),
            max_delay,
            backoff_multiplier: 2.0,
            budget: Some(budget),
        }
    }

    /// Pause before `attempt` (0 is the first try and never waits).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of every pause in a schedule that runs out of retries.
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }

    /// Time each attempt may take so that all attempts plus backoff stay
    /// inside the budget. Used as the per-request timeout of the wrapped
    /// exporter. Rounded down to whole milliseconds, the timer resolution.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.budget.map(|budget| {
            let share =
                budget.saturating_sub(self.total_backoff()) / self.max_retries.saturating_add(1);
            Duration::from_millis(share.as_millis() as u64)
        })
    }
}

/// Re-sends a batch after failures that [`ExportError::is_retryable`]
/// accepts. Rejections such as a 400 go straight back to the processor.
///
/// ```ignore
/// let retry = RetryConfig::within(config.export_timeout, 2);
/// let request_timeout = retry.attempt_timeout().unwrap_or(config.export_timeout);
/// let http = OtlpHttpExporter::new(SignalKind::Traces, endpoint, request_timeout)?;
/// let exporter = RetryingExporter::new(http, retry);
/// ```
pub struct RetryingExporter<E: Exporter> {
    inner: E,
    config: RetryConfig,
    total_retries: AtomicU64,
    recovered_exports: AtomicU64,
}

impl<E: Exporter> RetryingExporter<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_exports: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: E) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    /// Attempts made after a failure, across all batches.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Batches that failed at least once and then went through.
    pub fn recovered_exports(&self) -> u64 {
        self.recovered_exports.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether a retry that first waits `delay` still fits in the budget.
    fn fits_budget(&self, started: Instant, delay: Duration) -> bool {
        let Some(budget) = self.config.budget else {
            return true;
        };
        let needed = delay + self.config.attempt_timeout().unwrap_or_default();
        started.elapsed() + needed <= budget
    }
}

impl<E: Exporter> Exporter for RetryingExporter<E> {
    async fn export(&self, batch: Batch) -> ExportResult {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let started = Instant::now();

        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);

            #[cfg(debug_assertions)]
            debug_assert_retry_bounded!(attempt, max_attempts, delay, self.config.max_delay);

            if attempt > 0 {
                if !self.fits_budget(started, delay) {
                    tracing::debug!(
                        exporter = self.inner.name(),
                        attempt,
                        "retry budget spent"
                    );
                    return Err(ExportError::RetriesExhausted { attempts: attempt });
                }
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }

            match self.inner.export(batch.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_exports.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() || max_attempts == 1 => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        exporter = self.inner.name(),
                        attempt,
                        error = %e,
                        "export attempt failed"
                    );
                }
            }
        }

        Err(ExportError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
