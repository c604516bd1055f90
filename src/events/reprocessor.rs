use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{interval, timeout};
use tracing::{error, info, warn};

use crate::broker::EventBroker;
use crate::models::dead_letter::{backoff_window, DeadLetterStatus};
use crate::observability::metrics::Metrics;
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ReprocessSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Replays dead-lettered envelopes on an exponential backoff schedule
/// until the retry ceiling, then parks them as permanently failed.
/// Never raises to its invoker and is safe to re-run.
pub struct DeadLetterReprocessor {
    store: Arc<Store>,
    broker: Arc<dyn EventBroker>,
    metrics: Metrics,
    max_retries: u32,
    batch_size: usize,
    backoff_cap_minutes: u32,
    publish_timeout: Duration,
}

impl DeadLetterReprocessor {
    pub fn new(
        store: Arc<Store>,
        broker: Arc<dyn EventBroker>,
        metrics: Metrics,
        max_retries: u32,
        batch_size: usize,
        backoff_cap_minutes: u32,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            metrics,
            max_retries,
            batch_size,
            backoff_cap_minutes,
            publish_timeout,
        }
    }

    pub async fn run_once(&self) -> ReprocessSummary {
        let mut summary = ReprocessSummary::default();
        let due = self.store.due_dead_letters(Utc::now(), self.batch_size);

        for mut entry in due {
            entry.status = DeadLetterStatus::Retrying;
            entry.updated_at = Utc::now();
            self.store.update_dead_letter(entry.clone());

            let outcome = match timeout(
                self.publish_timeout,
                self.broker
                    .publish(&entry.channel, entry.partition_key.as_deref(), &entry.payload),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err("publish acknowledgment timed out".to_string()),
            };

            let now = Utc::now();
            match outcome {
                Ok(()) => {
                    entry.status = DeadLetterStatus::Processed;
                    entry.processed_at = Some(now);
                    summary.succeeded += 1;
                    info!(dead_letter_id = %entry.id, channel = %entry.channel, "dead letter republished");
                }
                Err(err) => {
                    entry.retry_count += 1;
                    entry.error_message = err.clone();
                    entry.next_retry_at =
                        now + backoff_window(entry.retry_count, self.backoff_cap_minutes);

                    if entry.retry_count >= self.max_retries {
                        entry.status = DeadLetterStatus::Failed;
                        error!(
                            dead_letter_id = %entry.id,
                            channel = %entry.channel,
                            retry_count = entry.retry_count,
                            error = %err,
                            "dead letter exhausted its retries"
                        );
                    } else {
                        entry.status = DeadLetterStatus::Pending;
                        warn!(
                            dead_letter_id = %entry.id,
                            channel = %entry.channel,
                            retry_count = entry.retry_count,
                            error = %err,
                            "dead letter retry failed, backing off"
                        );
                    }
                    summary.failed += 1;
                }
            }

            entry.updated_at = now;
            self.store.update_dead_letter(entry);
            summary.processed += 1;
        }

        self.metrics
            .dead_letters_pending
            .set(self.store.pending_dead_letter_count() as i64);

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "dead-letter reprocessing pass completed"
            );
        }
        summary
    }
}

pub async fn run_reprocessor_loop(reprocessor: Arc<DeadLetterReprocessor>, every: Duration) {
    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        reprocessor.run_once().await;
    }
}
