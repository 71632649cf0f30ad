use metrics_pipe::ConfigSource;
use metrics_pipe::MetricsConfig;
use metrics_pipe::Result;
use metrics_pipe::Session;
use metrics_pipe::SessionProvider;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::metrics::data::AggregatedMetrics;
use opentelemetry_sdk::metrics::data::Metric;
use opentelemetry_sdk::metrics::data::MetricData;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use std::collections::BTreeMap;

pub(crate) struct InMemorySource(pub(crate) InMemoryMetricExporter);

impl ConfigSource for InMemorySource {
    fn fetch(&self) -> Result<MetricsConfig> {
        in_memory_config(self.0.clone(), &[])
    }
}

pub(crate) fn in_memory_config(
    exporter: InMemoryMetricExporter,
    default_tags: &[(&str, &str)],
) -> Result<MetricsConfig> {
    let mut config =
        MetricsConfig::in_memory("test", "metrics-pipe", env!("CARGO_PKG_VERSION"), exporter);
    for (key, value) in default_tags {
        config = config.with_tag(*key, *value)?;
    }
    Ok(config)
}

pub(crate) fn start_session_with_defaults(
    default_tags: &[(&str, &str)],
) -> Result<(SessionProvider, Session, InMemoryMetricExporter)> {
    let exporter = InMemoryMetricExporter::default();
    let provider = SessionProvider::new();
    let session = provider.start_with(in_memory_config(exporter.clone(), default_tags)?)?;
    Ok((provider, session, exporter))
}

pub(crate) fn latest_metrics(exporter: &InMemoryMetricExporter) -> ResourceMetrics {
    let Ok(metrics) = exporter.get_finished_metrics() else {
        panic!("finished metrics error");
    };
    let Some(metrics) = metrics.into_iter().last() else {
        panic!("metrics export missing");
    };
    metrics
}

pub(crate) fn find_metric<'a>(
    resource_metrics: &'a ResourceMetrics,
    name: &str,
) -> Option<&'a Metric> {
    for scope_metrics in resource_metrics.scope_metrics() {
        for metric in scope_metrics.metrics() {
            if metric.name() == name {
                return Some(metric);
            }
        }
    }
    None
}

pub(crate) fn attributes_to_map<'a>(
    attributes: impl Iterator<Item = &'a KeyValue>,
) -> BTreeMap<String, String> {
    attributes
        .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().to_string()))
        .collect()
}

pub(crate) fn counter_points(resource_metrics: &ResourceMetrics, name: &str) -> Vec<(u64, BTreeMap<String, String>)> {
    let metric =
        find_metric(resource_metrics, name).unwrap_or_else(|| panic!("metric {name} missing"));
    match metric.data() {
        AggregatedMetrics::U64(MetricData::Sum(sum)) => sum
            .data_points()
            .map(|point| (point.value(), attributes_to_map(point.attributes())))
            .collect(),
        _ => panic!("unexpected counter data type"),
    }
}

pub(crate) fn histogram_attributes(
    resource_metrics: &ResourceMetrics,
    name: &str,
) -> BTreeMap<String, String> {
    let metric =
        find_metric(resource_metrics, name).unwrap_or_else(|| panic!("metric {name} missing"));
    match metric.data() {
        AggregatedMetrics::F64(MetricData::Histogram(histogram)) => {
            let Some(point) = histogram.data_points().next() else {
                panic!("histogram data point missing");
            };
            attributes_to_map(point.attributes())
        }
        _ => panic!("unexpected metric data type"),
    }
}

pub(crate) fn histogram_data(
    resource_metrics: &ResourceMetrics,
    name: &str,
) -> (Vec<f64>, Vec<u64>, f64, u64) {
    let metric =
        find_metric(resource_metrics, name).unwrap_or_else(|| panic!("metric {name} missing"));
    match metric.data() {
        AggregatedMetrics::F64(data) => match data {
            MetricData::Histogram(histogram) => {
                let points: Vec<_> = histogram.data_points().collect();
                assert_eq!(points.len(), 1);
                let point = points[0];
                let bounds = point.bounds().collect();
                let bucket_counts = point.bucket_counts().collect();
                (bounds, bucket_counts, point.sum(), point.count())
            }
            _ => panic!("unexpected histogram aggregation"),
        },
        _ => panic!("unexpected metric data type"),
    }
}
