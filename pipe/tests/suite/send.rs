use crate::harness::counter_points;
use crate::harness::histogram_attributes;
use crate::harness::histogram_data;
use crate::harness::latest_metrics;
use crate::harness::start_session_with_defaults;
use metrics_pipe::PipeError;
use metrics_pipe::Result;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

// Ensures counters/histograms render with default + per-call tags, and
// that per-call tags override defaults.
#[test]
fn send_merges_default_and_per_call_tags() -> Result<()> {
    let (provider, session, exporter) =
        start_session_with_defaults(&[("service", "billing"), ("env", "prod")])?;

    session.counter("pipe.requests", 1, &[("route", "checkout"), ("env", "dev")])?;
    session.histogram("pipe.request_latency", 25, &[("route", "checkout")])?;
    provider.stop()?;

    let resource_metrics = latest_metrics(&exporter);

    let points = counter_points(&resource_metrics, "pipe.requests");
    assert_eq!(points.len(), 1);
    let (value, attrs) = &points[0];
    assert_eq!(*value, 1);
    let expected = BTreeMap::from([
        ("service".to_string(), "billing".to_string()),
        ("env".to_string(), "dev".to_string()),
        ("route".to_string(), "checkout".to_string()),
    ]);
    assert_eq!(attrs, &expected);

    let (bounds, bucket_counts, sum, count) =
        histogram_data(&resource_metrics, "pipe.request_latency");
    assert!(!bounds.is_empty());
    assert_eq!(bucket_counts.iter().sum::<u64>(), 1);
    assert_eq!(sum, 25.0);
    assert_eq!(count, 1);

    let histogram_attrs = histogram_attributes(&resource_metrics, "pipe.request_latency");
    let expected_histogram_attrs = BTreeMap::from([
        ("service".to_string(), "billing".to_string()),
        ("env".to_string(), "prod".to_string()),
        ("route".to_string(), "checkout".to_string()),
    ]);
    assert_eq!(histogram_attrs, expected_histogram_attrs);

    Ok(())
}

// Ensures stop flushes enqueued data points to the exporter.
#[test]
fn stop_flushes_pending_data_points() -> Result<()> {
    let (provider, session, exporter) = start_session_with_defaults(&[])?;

    session.counter("pipe.turns", 1, &[("model", "relay")])?;
    provider.stop()?;

    let resource_metrics = latest_metrics(&exporter);
    let points = counter_points(&resource_metrics, "pipe.turns");
    assert_eq!(points.len(), 1);
    let (value, attrs) = &points[0];
    assert_eq!(*value, 1);
    assert_eq!(attrs.get("model").map(String::as_str), Some("relay"));
    Ok(())
}

// Ensures stopping without recording exports nothing.
#[test]
fn stop_without_metrics_exports_nothing() -> Result<()> {
    let (provider, _session, exporter) = start_session_with_defaults(&[])?;

    provider.stop()?;

    let finished = exporter.get_finished_metrics().unwrap();
    assert!(finished.is_empty(), "expected no metrics exported");
    Ok(())
}

#[test]
fn counter_rejects_invalid_metric_name() -> Result<()> {
    let (provider, session, _exporter) = start_session_with_defaults(&[])?;
    let err = session.counter("bad name", 1, &[]).unwrap_err();
    assert!(matches!(
        err,
        PipeError::InvalidMetricName { name } if name == "bad name"
    ));
    provider.stop()?;
    Ok(())
}

#[test]
fn counter_rejects_negative_increment() -> Result<()> {
    let (provider, session, _exporter) = start_session_with_defaults(&[])?;
    let err = session.counter("pipe.turns", -1, &[]).unwrap_err();
    assert!(matches!(
        err,
        PipeError::NegativeCounterIncrement { name, inc } if name == "pipe.turns" && inc == -1
    ));
    provider.stop()?;
    Ok(())
}

#[test]
fn histogram_rejects_invalid_tag_value() -> Result<()> {
    let (provider, session, _exporter) = start_session_with_defaults(&[])?;
    let err = session
        .histogram("pipe.request_latency", 3, &[("route", "bad value")])
        .unwrap_err();
    assert!(matches!(
        err,
        PipeError::InvalidTagComponent { label, value }
            if label == "tag value" && value == "bad value"
    ));
    provider.stop()?;
    Ok(())
}
