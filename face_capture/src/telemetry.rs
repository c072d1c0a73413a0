use crate::decision::Decision;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    frames_counter: Counter<u64>,
    skipped_frames_counter: Counter<u64>,
    decision_counter: Counter<u64>,
    search_duration: Histogram<u64>,
    loop_fps: Gauge<f64>,
    // Keeps the pipeline alive for as long as the instruments are used.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("face_capture");
        global::set_meter_provider(provider.clone());

        let frames_counter = meter
            .u64_counter("frames")
            .with_description("Frames read from the camera")
            .build();

        let skipped_frames_counter = meter
            .u64_counter("skipped_frames")
            .with_description("Frames dropped because they could not be encoded")
            .build();

        let decision_counter = meter
            .u64_counter("decisions")
            .with_description("Rendered decisions by outcome")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let search_duration = meter
            .u64_histogram("search_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of face search calls in milliseconds")
            .build();

        let loop_fps = meter
            .f64_gauge("loop_fps")
            .with_description("Iterations per second of the recognition loop")
            .build();

        Ok(Metrics {
            frames_counter,
            skipped_frames_counter,
            decision_counter,
            search_duration,
            loop_fps,
            _provider: provider,
            registry,
        })
    }

    pub fn record_frame(&self) {
        self.frames_counter.add(1, &[]);
    }

    pub fn record_skipped_frame(&self) {
        self.skipped_frames_counter.add(1, &[]);
    }

    pub fn record_decision(&self, decision: &Decision) {
        let attributes = [KeyValue::new("outcome", decision.outcome())];
        self.decision_counter.add(1, &attributes);
    }

    pub fn record_search_duration(&self, duration_ms: u64, outcome: &'static str) {
        let attributes = [KeyValue::new("outcome", outcome)];
        self.search_duration.record(duration_ms, &attributes);
    }

    pub fn record_loop_fps(&self, fps: f64) {
        self.loop_fps.record(fps, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (2, 22, 26, 46, 146);
        let get = generate_boundaries(parts);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_decisions_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_frame();
        metrics.record_decision(&Decision::NoMatch);
        metrics.record_search_duration(42, "no_match");

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.iter().any(|name| name.starts_with("decisions")));
        assert!(names.iter().any(|name| name.starts_with("search_duration")));
    }
}
