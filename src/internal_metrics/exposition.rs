//! Renders the gauges of a collection pass in the Prometheus text format.
//!
//! Each render uses a fresh, local recorder, so a gauge only ever appears in
//! the scrape whose pass produced it.

use crate::core::GaugeMetric;
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn render(gauges: &[GaugeMetric]) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        for gauge in gauges {
            let (key, value) = gauge.label();
            let labels: Vec<Label> = gauge
                .const_labels()
                .iter()
                .map(|(k, v)| Label::new(k.clone(), v.clone()))
                .chain(std::iter::once(Label::new(key.to_string(), value.to_string())))
                .collect();

            metrics::describe_gauge!(gauge.name().to_string(), gauge.help());
            metrics::gauge!(gauge.name().to_string(), labels).set(gauge.value());
        }
    });

    handle.render()
}
