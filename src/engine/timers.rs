use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::engine::dispatch::DispatchEngine;

/// Keyed, cancellable delayed tasks. Scheduling a key again replaces
/// (and aborts) the previous timer for that key.
#[derive(Default)]
pub struct TaskTimers {
    tasks: Arc<DashMap<Uuid, JoinHandle<()>>>,
}

impl TaskTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, key: Uuid, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tasks = self.tasks.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            tasks.remove(&key);
        });

        if let Some(previous) = self.tasks.insert(key, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self, key: Uuid) -> bool {
        match self.tasks.remove(&key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Start the readiness timer for a freshly created order.
pub fn schedule_preparation(timers: &TaskTimers, engine: Arc<DispatchEngine>, order_id: Uuid) {
    let delay = engine.preparation_delay();
    timers.schedule(order_id, delay, async move {
        if let Err(err) = engine.mark_order_ready(order_id).await {
            warn!(order_id = %order_id, error = %err, "order readiness transition failed");
        }
    });
}
