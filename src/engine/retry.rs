use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::time::interval;
use tracing::{info, warn};

use crate::engine::dispatch::DispatchEngine;
use crate::error::AppError;
use crate::models::dead_letter::backoff_window;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct RetrySummary {
    pub examined: usize,
    pub assigned: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl DispatchEngine {
    /// Sweep ready orders that still lack a live delivery. Stale orders
    /// are cancelled, exhausted or still-backing-off orders skipped, the
    /// rest re-attempted through the normal assignment path. Relies on
    /// the same per-order locks as live traffic, so it is safe to run
    /// concurrently with it.
    pub async fn retry_unassigned(&self, max_retries: u32, max_age_hours: i64) -> RetrySummary {
        let mut summary = RetrySummary::default();
        let now = Utc::now();
        let candidates = self.store.ready_orders_without_delivery();

        self.metrics
            .unassigned_ready_orders
            .set(candidates.len() as i64);

        for order in candidates {
            summary.examined += 1;

            if now - order.created_at > ChronoDuration::hours(max_age_hours) {
                match self
                    .cancel_order(order.id, "unassigned past maximum age")
                    .await
                {
                    Ok(()) => summary.cancelled += 1,
                    Err(err) => {
                        warn!(order_id = %order.id, error = %err, "stale order cancellation failed")
                    }
                }
                continue;
            }

            if order.assignment_retry_count >= max_retries {
                summary.skipped += 1;
                continue;
            }

            if let Some(last_attempt) = order.last_assignment_retry_at {
                let window =
                    backoff_window(order.assignment_retry_count, self.config.backoff_cap_minutes);
                if now < last_attempt + window {
                    summary.skipped += 1;
                    continue;
                }
            }

            match self.assign(order.id).await {
                Ok(_) => summary.assigned += 1,
                Err(AppError::NoAvailableCouriers) => {
                    // Recorded on the order row as retry bookkeeping.
                }
                Err(err) => {
                    warn!(order_id = %order.id, error = %err, "retry assignment failed");
                    summary.skipped += 1;
                }
            }
        }

        if summary.examined > 0 {
            info!(
                examined = summary.examined,
                assigned = summary.assigned,
                cancelled = summary.cancelled,
                skipped = summary.skipped,
                "unassigned-order retry pass completed"
            );
        }
        summary
    }
}

pub async fn run_retry_scheduler(engine: Arc<DispatchEngine>, every: Duration) {
    let max_retries = engine.config.assignment_max_retries;
    let max_age_hours = engine.config.order_max_age_hours;

    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        engine.retry_unassigned(max_retries, max_age_hours).await;
    }
}
