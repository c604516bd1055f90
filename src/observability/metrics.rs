use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub events_published_total: IntCounterVec,
    pub dead_letters_pending: IntGauge,
    pub unassigned_ready_orders: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Broker publish attempts by channel and outcome",
            ),
            &["channel", "outcome"],
        )
        .expect("valid events_published_total metric");

        let dead_letters_pending = IntGauge::new(
            "dead_letters_pending",
            "Dead-letter entries waiting for a retry",
        )
        .expect("valid dead_letters_pending metric");

        let unassigned_ready_orders = IntGauge::new(
            "unassigned_ready_orders",
            "Ready orders currently lacking a live delivery",
        )
        .expect("valid unassigned_ready_orders metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(dead_letters_pending.clone()))
            .expect("register dead_letters_pending");
        registry
            .register(Box::new(unassigned_ready_orders.clone()))
            .expect("register unassigned_ready_orders");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            events_published_total,
            dead_letters_pending,
            unassigned_ready_orders,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
