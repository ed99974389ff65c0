use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started: Instant,
    pub vitals_sample_passes_total: Counter,
    pub vitals_sample_duration_seconds: Gauge,
    pub vitals_source_errors_total: CounterVec,
    pub vitals_sensor_missing_total: CounterVec,
    pub vitals_scrape_count_total: Counter,
    pub vitals_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let vitals_sample_passes_total = Counter::with_opts(opts!(
            "vitals_sample_passes_total",
            "Completed sampling passes"
        ))?;
        let vitals_sample_duration_seconds = Gauge::with_opts(opts!(
            "vitals_sample_duration_seconds",
            "Wall time of the last sampling pass in seconds"
        ))?;
        let vitals_source_errors_total = CounterVec::new(
            opts!(
                "vitals_source_errors_total",
                "Counter source read failures by source"
            ),
            &["source"],
        )?;
        let vitals_sensor_missing_total = CounterVec::new(
            opts!(
                "vitals_sensor_missing_total",
                "Passes where a sensor field was not available, by field"
            ),
            &["field"],
        )?;
        let vitals_scrape_count_total = Counter::with_opts(opts!(
            "vitals_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let vitals_uptime_seconds =
            Gauge::with_opts(opts!("vitals_uptime_seconds", "Process uptime in seconds"))?;

        register(&registry, &vitals_sample_passes_total)?;
        register(&registry, &vitals_sample_duration_seconds)?;
        register(&registry, &vitals_source_errors_total)?;
        register(&registry, &vitals_sensor_missing_total)?;
        register(&registry, &vitals_scrape_count_total)?;
        register(&registry, &vitals_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started: Instant::now(),
            vitals_sample_passes_total,
            vitals_sample_duration_seconds,
            vitals_source_errors_total,
            vitals_sensor_missing_total,
            vitals_scrape_count_total,
            vitals_uptime_seconds,
        }))
    }

    pub fn observe_pass(&self, elapsed: Duration) {
        self.vitals_sample_passes_total.inc();
        self.vitals_sample_duration_seconds
            .set(elapsed.as_secs_f64());
    }

    pub fn inc_source_error(&self, source: &str) {
        self.vitals_source_errors_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_sensor_missing(&self, field: &str) {
        self.vitals_sensor_missing_total
            .with_label_values(&[field])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.vitals_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.vitals_uptime_seconds
            .set(self.started.elapsed().as_secs_f64());

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
