use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::BTreeSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    pub registry: Registry,
    // Replacing the global provider must not shut this exporter down.
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build prometheus exporter: {}", e))?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("onnx_classifier");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of classification requests")
            .build();

        // Milliseconds: fine steps for small CPU models, coarse for large ones.
        let boundaries = generate_boundaries(&[(5, 50, 5), (50, 250, 25), (250, 2000, 250)]);

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("End-to-end duration of classification requests in milliseconds")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self, model: &str, outcome: &str) {
        let attributes = [
            KeyValue::new("model", model.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, model: &str) {
        let attributes = [KeyValue::new("model", model.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }
}

/// Expands `(start, end, step)` segments into sorted, de-duplicated bucket
/// boundaries.
fn generate_boundaries(segments: &[(u64, u64, usize)]) -> Vec<f64> {
    segments
        .iter()
        .flat_map(|&(start, end, step)| (start..=end).step_by(step.max(1)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|x| x as f64)
        .collect()
}
