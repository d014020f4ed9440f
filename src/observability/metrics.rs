use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub location_updates_total: IntCounterVec,
    pub ingest_latency_seconds: HistogramVec,
    pub alerts_total: IntCounterVec,
    pub events_published_total: IntCounterVec,
    pub deliveries_completed_total: IntCounter,
    pub drivers_evicted_total: IntCounter,
    pub tracked_drivers: IntGauge,
    pub tracked_deliveries: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let location_updates_total = IntCounterVec::new(
            Opts::new("location_updates_total", "Location ingests by outcome"),
            &["outcome"],
        )
        .expect("valid location_updates_total metric");

        let ingest_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ingest_latency_seconds",
                "Latency of the location ingest pipeline in seconds",
            ),
            &["outcome"],
        )
        .expect("valid ingest_latency_seconds metric");

        let alerts_total = IntCounterVec::new(
            Opts::new("alerts_total", "Alerts raised by kind"),
            &["kind"],
        )
        .expect("valid alerts_total metric");

        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Engine events published by topic"),
            &["topic"],
        )
        .expect("valid events_published_total metric");

        let deliveries_completed_total = IntCounter::new(
            "deliveries_completed_total",
            "Deliveries driven to the completed state",
        )
        .expect("valid deliveries_completed_total metric");

        let drivers_evicted_total = IntCounter::new(
            "drivers_evicted_total",
            "Drivers evicted by the staleness sweep",
        )
        .expect("valid drivers_evicted_total metric");

        let tracked_drivers = IntGauge::new("tracked_drivers", "Registered drivers")
            .expect("valid tracked_drivers metric");

        let tracked_deliveries = IntGauge::new("tracked_deliveries", "Deliveries held in memory")
            .expect("valid tracked_deliveries metric");

        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(ingest_latency_seconds.clone()))
            .expect("register ingest_latency_seconds");
        registry
            .register(Box::new(alerts_total.clone()))
            .expect("register alerts_total");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(deliveries_completed_total.clone()))
            .expect("register deliveries_completed_total");
        registry
            .register(Box::new(drivers_evicted_total.clone()))
            .expect("register drivers_evicted_total");
        registry
            .register(Box::new(tracked_drivers.clone()))
            .expect("register tracked_drivers");
        registry
            .register(Box::new(tracked_deliveries.clone()))
            .expect("register tracked_deliveries");

        Self {
            registry,
            location_updates_total,
            ingest_latency_seconds,
            alerts_total,
            events_published_total,
            deliveries_completed_total,
            drivers_evicted_total,
            tracked_drivers,
            tracked_deliveries,
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
