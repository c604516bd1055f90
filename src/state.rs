use std::sync::Arc;

use crate::broker::InProcessBroker;
use crate::cache::MemoryCache;
use crate::config::Config;
use crate::engine::dispatch::DispatchEngine;
use crate::engine::lifecycle::DeliveryLifecycle;
use crate::engine::timers::TaskTimers;
use crate::events::reprocessor::DeadLetterReprocessor;
use crate::events::EventPipeline;
use crate::location::LocationStore;
use crate::observability::metrics::Metrics;
use crate::realtime::FanOut;
use crate::store::Store;

/// Every component instance, wired once at process start and handed to
/// the request handlers and background tasks.
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub cache: Arc<MemoryCache>,
    pub broker: Arc<InProcessBroker>,
    pub metrics: Metrics,
    pub fanout: Arc<FanOut>,
    pub pipeline: Arc<EventPipeline>,
    pub locations: Arc<LocationStore>,
    pub dispatch: Arc<DispatchEngine>,
    pub lifecycle: Arc<DeliveryLifecycle>,
    pub reprocessor: Arc<DeadLetterReprocessor>,
    pub timers: TaskTimers,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(Store::new(config.lock_wait()));
        let cache = Arc::new(MemoryCache::new());
        let broker = Arc::new(InProcessBroker::new(config.event_buffer_size));
        let fanout = Arc::new(FanOut::new(config.event_buffer_size));
        let metrics = Metrics::new();

        let pipeline = Arc::new(EventPipeline::new(
            store.clone(),
            cache.clone(),
            broker.clone(),
            metrics.clone(),
            config.publish_timeout(),
            config.idempotency_ttl(),
            config.backoff_cap_minutes,
        ));
        let locations = Arc::new(LocationStore::new(
            store.clone(),
            cache.clone(),
            pipeline.clone(),
            fanout.clone(),
            config.location_ttl(),
        ));
        let dispatch = Arc::new(DispatchEngine::new(
            store.clone(),
            cache.clone(),
            locations.clone(),
            pipeline.clone(),
            fanout.clone(),
            metrics.clone(),
            config.clone(),
        ));
        let lifecycle = Arc::new(DeliveryLifecycle::new(
            store.clone(),
            cache.clone(),
            locations.clone(),
            pipeline.clone(),
            fanout.clone(),
        ));
        let reprocessor = Arc::new(DeadLetterReprocessor::new(
            store.clone(),
            broker.clone(),
            metrics.clone(),
            config.dlq_max_retries,
            config.dlq_batch_size,
            config.backoff_cap_minutes,
            config.publish_timeout(),
        ));

        Self {
            config,
            store,
            cache,
            broker,
            metrics,
            fanout,
            pipeline,
            locations,
            dispatch,
            lifecycle,
            reprocessor,
            timers: TaskTimers::new(),
        }
    }
}
