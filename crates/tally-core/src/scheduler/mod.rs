//! Expiration scheduler: drives Active -> Closed transitions for overdue
//! polls.
//!
//! Deadlines are authoritative only once a close wins: a vote arriving after
//! the deadline but before the next sweep is still accepted, because
//! rejection is driven by poll *state*, not wall clock. Each sweep queries
//! persisted deadlines - never in-memory timers - so a restarted process
//! rediscovers overdue polls immediately, and every close goes through the
//! same idempotent engine entry point an admin uses, which makes overlapping
//! sweeps and admin/scheduler races harmless by construction.

use crate::engine::PollEngine;
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info};

/// Periodic deadline sweeper over the engine's close path.
pub struct ExpirationScheduler {
    engine: Arc<PollEngine>,
    tick_interval: Duration,
}

impl ExpirationScheduler {
    #[must_use]
    pub fn new(engine: Arc<PollEngine>, tick_interval: Duration) -> Self {
        Self { engine, tick_interval }
    }

    /// Runs one sweep: closes every Active poll whose deadline is at or
    /// before `now`.
    ///
    /// Safe to call concurrently with admin closes and with other sweeps;
    /// polls closed by somebody else in the meantime count as no-ops, not
    /// errors. Returns the number of polls this sweep closed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::PollError::StorageUnavailable`] only when the
    /// overdue query itself fails; per-poll close failures are logged and
    /// skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, crate::errors::PollError> {
        let closed = self.engine.close_overdue(now).await?;
        metrics::record_scheduler_sweep(closed);
        if closed > 0 {
            info!(closed, "expiration sweep closed overdue polls");
        }
        Ok(closed)
    }

    /// Spawns the periodic sweep loop, stopping when `shutdown_rx` fires.
    #[must_use]
    pub fn start_with_shutdown(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let tick_interval = self.tick_interval;

        tokio::spawn(async move {
            let scheduler = ExpirationScheduler::new(engine, tick_interval);
            let mut interval = interval(tick_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.tick(Utc::now()).await {
                            error!(error = %e, "expiration sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("expiration scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }
}
