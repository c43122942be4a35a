use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers the paths where failures are absorbed rather than surfaced:
// - Cache lookups and writes by outcome (degraded cache is only visible here)
// - Durable store operations (count, outcome, latency)
// - Ingestion outcomes and work-queue depth (backpressure)
// - Startup preload
// - Cache circuit breaker state
//
// Scraped via GET /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Cache
    pub cache_lookups: IntCounterVec,
    pub cache_writes: IntCounterVec,
    pub cache_circuit_state: IntGauge,

    // Durable store
    pub store_operations: IntCounterVec,
    pub store_duration: HistogramVec,

    // Ingestion
    pub ingest_messages: IntCounterVec,
    pub ingest_queue_depth: IntGauge,

    // Preload
    pub preload_cached: IntCounter,
    pub preload_failed: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cache_lookups = IntCounterVec::new(
            Opts::new("order_cache_lookups_total", "Cache lookups by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let cache_writes = IntCounterVec::new(
            Opts::new("order_cache_writes_total", "Cache writes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cache_writes.clone()))?;

        let cache_circuit_state = IntGauge::new(
            "order_cache_circuit_state",
            "Cache circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(cache_circuit_state.clone()))?;

        let store_operations = IntCounterVec::new(
            Opts::new("order_store_operations_total", "Durable store operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(store_operations.clone()))?;

        let store_duration = HistogramVec::new(
            HistogramOpts::new("order_store_duration_seconds", "Durable store operation latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(store_duration.clone()))?;

        let ingest_messages = IntCounterVec::new(
            Opts::new("order_ingest_messages_total", "Ingested messages by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_messages.clone()))?;

        let ingest_queue_depth = IntGauge::new(
            "order_ingest_queue_depth",
            "Orders waiting in the ingest work queue",
        )?;
        registry.register(Box::new(ingest_queue_depth.clone()))?;

        let preload_cached = IntCounter::new(
            "order_preload_cached_total",
            "Orders written to the cache by startup preload",
        )?;
        registry.register(Box::new(preload_cached.clone()))?;

        let preload_failed = IntCounter::new(
            "order_preload_failed_total",
            "Orders skipped by startup preload",
        )?;
        registry.register(Box::new(preload_failed.clone()))?;

        Ok(Self {
            registry,
            cache_lookups,
            cache_writes,
            cache_circuit_state,
            store_operations,
            store_duration,
            ingest_messages,
            ingest_queue_depth,
            preload_cached,
            preload_failed,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// `outcome` is one of hit, miss, error, corrupt
    pub fn record_cache_lookup(&self, outcome: &str) {
        self.cache_lookups.with_label_values(&[outcome]).inc();
    }

    pub fn record_cache_write(&self, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.cache_writes.with_label_values(&[outcome]).inc();
    }

    pub fn record_store_operation(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.store_operations.with_label_values(&[operation, outcome]).inc();
        self.store_duration.with_label_values(&[operation]).observe(duration_secs);
    }

    /// `outcome` is one of stored, duplicate, invalid, failed, abandoned
    pub fn record_ingest(&self, outcome: &str) {
        self.ingest_messages.with_label_values(&[outcome]).inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &Metrics, name: &str, label: &str) -> Option<f64> {
        let gathered = metrics.registry.gather();
        let family = gathered.iter().find(|m| m.name() == name)?;
        family
            .metric
            .iter()
            .find(|m| m.label.iter().any(|l| l.value() == label))
            .and_then(|m| m.counter.value)
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_lookup("hit");
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_cache_lookup_outcomes_are_separate_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_lookup("hit");
        metrics.record_cache_lookup("hit");
        metrics.record_cache_lookup("corrupt");

        assert_eq!(counter_value(&metrics, "order_cache_lookups_total", "hit"), Some(2.0));
        assert_eq!(counter_value(&metrics, "order_cache_lookups_total", "corrupt"), Some(1.0));
        assert_eq!(counter_value(&metrics, "order_cache_lookups_total", "miss"), None);
    }

    #[test]
    fn test_ingest_and_write_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_ingest("duplicate");
        metrics.record_cache_write(false);

        assert_eq!(counter_value(&metrics, "order_ingest_messages_total", "duplicate"), Some(1.0));
        assert_eq!(counter_value(&metrics, "order_cache_writes_total", "error"), Some(1.0));
    }

    #[test]
    fn test_encode_text_contains_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.record_store_operation("fetch", "found", 0.002);
        metrics.ingest_queue_depth.set(3);

        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains("order_store_operations_total"));
        assert!(text.contains("order_ingest_queue_depth 3"));
    }
}
