//! Background workers: expiry sweeping and waitlist promotion.

use std::sync::Arc;
use std::time::Duration;

use store::AllocatorStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::notify::NotificationService;
use crate::service::Allocator;

/// How many promotion jobs one worker pass claims.
const PROMOTION_BATCH: i64 = 32;

/// Periodically cancels unpaid registrations that outlived the
/// pending TTL.
pub struct ExpirySweeper<S, N> {
    allocator: Arc<Allocator<S, N>>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, N> ExpirySweeper<S, N>
where
    S: AllocatorStore,
    N: NotificationService,
{
    /// Creates a new sweeper.
    pub fn new(
        allocator: Arc<Allocator<S, N>>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            allocator,
            interval,
            shutdown_rx,
        }
    }

    /// Runs until the shutdown signal flips to true.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "ExpirySweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("ExpirySweeper received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.allocator.expire_due().await {
                        error!(error = %e, "expiry sweep failed");
                    }
                }
            }
        }

        info!("ExpirySweeper shutdown complete");
    }
}

/// Drains promotion jobs and fills freed seats from the waitlist.
///
/// A single worker per process keeps promotion ordered; correctness
/// does not depend on that, since the store hands each job out once
/// and re-checks capacity per conversion.
pub struct PromotionWorker<S, N> {
    allocator: Arc<Allocator<S, N>>,
    poll_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, N> PromotionWorker<S, N>
where
    S: AllocatorStore,
    N: NotificationService,
{
    /// Creates a new promotion worker.
    pub fn new(
        allocator: Arc<Allocator<S, N>>,
        poll_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            allocator,
            poll_interval,
            shutdown_rx,
        }
    }

    /// Runs until the shutdown signal flips to true. Wakes on the
    /// allocator's nudge and also polls, so jobs written by another
    /// process (or left over from a crash) still get drained.
    pub async fn run(mut self) {
        info!(poll_secs = self.poll_interval.as_secs(), "PromotionWorker started");
        let signal = self.allocator.promotion_signal();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("PromotionWorker received shutdown signal");
                        break;
                    }
                }

                _ = signal.notified() => {
                    self.drain().await;
                }

                _ = ticker.tick() => {
                    self.drain().await;
                }
            }
        }

        info!("PromotionWorker shutdown complete");
    }

    async fn drain(&self) {
        loop {
            match self.allocator.run_promotions(PROMOTION_BATCH).await {
                Ok(report) if report.jobs_processed == 0 => break,
                Ok(report) => {
                    if report.converted > 0 || report.skipped > 0 {
                        info!(
                            jobs = report.jobs_processed,
                            converted = report.converted,
                            skipped = report.skipped,
                            "promotion pass complete"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "promotion pass failed");
                    break;
                }
            }
        }
    }
}
