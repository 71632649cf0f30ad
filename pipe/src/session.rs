use crate::config::ExporterConfig;
use crate::config::HttpProtocol;
use crate::config::MetricsConfig;
use crate::error::PipeError;
use crate::error::Result;
use crate::timer::StopwatchFactory;
use crate::timer::Timer;
use crate::validation::validate_metric_name;
use crate::validation::validate_tag_key;
use crate::validation::validate_tag_value;
use crate::validation::validate_tags;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Histogram;
use opentelemetry::metrics::Meter;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_otlp::Protocol;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_otlp::WithHttpConfig;
use opentelemetry_otlp::WithTonicConfig;
use opentelemetry_otlp::tonic_types::metadata::MetadataMap;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::PeriodicReader;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_semantic_conventions as semconv;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::debug;

const ENV_ATTRIBUTE: &str = "env";
const METER_NAME: &str = "metrics_pipe";

struct SessionInner {
    meter_provider: SdkMeterProvider,
    meter: Meter,
    counters: Mutex<HashMap<String, Counter<u64>>>,
    histograms: Mutex<HashMap<String, Histogram<f64>>>,
    default_tags: BTreeMap<String, String>,
    stopwatch: StopwatchFactory,
    stopped: AtomicBool,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("default_tags", &self.default_tags)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn counter(&self, name: &str, inc: i64, tags: &[(&str, &str)]) -> Result<()> {
        validate_metric_name(name)?;
        if inc < 0 {
            return Err(PipeError::NegativeCounterIncrement {
                name: name.to_string(),
                inc,
            });
        }
        let attributes = self.attributes(tags)?;

        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| self.meter.u64_counter(name.to_string()).build());
        counter.add(inc as u64, &attributes);
        Ok(())
    }

    fn histogram(&self, name: &str, value: i64, tags: &[(&str, &str)]) -> Result<()> {
        validate_metric_name(name)?;
        let attributes = self.attributes(tags)?;

        let mut histograms = self
            .histograms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let histogram = histograms
            .entry(name.to_string())
            .or_insert_with(|| self.meter.f64_histogram(name.to_string()).build());
        histogram.record(value as f64, &attributes);
        Ok(())
    }

    fn attributes(&self, tags: &[(&str, &str)]) -> Result<Vec<KeyValue>> {
        if tags.is_empty() {
            return Ok(self
                .default_tags
                .iter()
                .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
                .collect());
        }

        let mut merged = self.default_tags.clone();
        for (key, value) in tags {
            validate_tag_key(key)?;
            validate_tag_value(value)?;
            merged.insert((*key).to_string(), (*value).to_string());
        }

        Ok(merged
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect())
    }

    fn stop(&self) -> Result<()> {
        debug!("flushing metrics session");
        self.stopped.store(true, Ordering::SeqCst);
        self.meter_provider
            .force_flush()
            .map_err(|source| PipeError::ProviderShutdown { source })?;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.meter_provider
            .shutdown()
            .map_err(|source| PipeError::ProviderShutdown { source })?;
        Ok(())
    }
}

/// A metrics-emission session. Cheap to clone; all clones share the same
/// underlying meter provider.
#[derive(Clone, Debug)]
pub struct Session(Arc<SessionInner>);

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Session {
    /// Build a session from configuration and a stopwatch factory.
    pub fn new(config: MetricsConfig, stopwatch: StopwatchFactory) -> Result<Self> {
        validate_tags(&config.default_tags)?;

        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .with_attributes(vec![
                KeyValue::new(
                    semconv::attribute::SERVICE_VERSION,
                    config.service_version.clone(),
                ),
                KeyValue::new(ENV_ATTRIBUTE, config.environment.clone()),
            ])
            .build();

        let (meter_provider, meter) = match config.exporter {
            ExporterConfig::None => return Err(PipeError::ExporterDisabled),
            ExporterConfig::InMemory(exporter) => {
                build_provider(resource, exporter, config.export_interval)
            }
            exporter => {
                let exporter = build_otlp_metric_exporter(exporter, Temporality::Delta)?;
                build_provider(resource, exporter, config.export_interval)
            }
        };

        Ok(Self(Arc::new(SessionInner {
            meter_provider,
            meter,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            default_tags: config.default_tags,
            stopwatch,
            stopped: AtomicBool::new(false),
        })))
    }

    /// Send a single counter increment.
    pub fn counter(&self, name: &str, inc: i64, tags: &[(&str, &str)]) -> Result<()> {
        self.0.counter(name, inc, tags)
    }

    /// Send a single histogram sample.
    pub fn histogram(&self, name: &str, value: i64, tags: &[(&str, &str)]) -> Result<()> {
        self.0.histogram(name, value, tags)
    }

    /// Record a duration in milliseconds using a histogram.
    pub fn record_duration(
        &self,
        name: &str,
        duration: Duration,
        tags: &[(&str, &str)],
    ) -> Result<()> {
        self.histogram(
            name,
            duration.as_millis().min(i64::MAX as u128) as i64,
            tags,
        )
    }

    /// Start a timer that records its elapsed time when dropped.
    pub fn start_timer(&self, name: &str, tags: &[(&str, &str)]) -> Result<Timer> {
        let stopwatch = (self.0.stopwatch)();
        Ok(Timer::new(name, tags, self, stopwatch))
    }

    /// Signal the session to flush pending data points.
    pub fn stop(&self) -> Result<()> {
        self.0.stop()
    }

    /// Release the underlying meter provider. Must follow [`Session::stop`].
    pub fn release(&self) -> Result<()> {
        self.0.release()
    }

    pub fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }
}

fn build_provider<E>(
    resource: Resource,
    exporter: E,
    interval: Option<Duration>,
) -> (SdkMeterProvider, Meter)
where
    E: opentelemetry_sdk::metrics::exporter::PushMetricExporter + 'static,
{
    let mut reader_builder = PeriodicReader::builder(exporter);
    if let Some(interval) = interval {
        reader_builder = reader_builder.with_interval(interval);
    }
    let reader = reader_builder.build();
    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();
    let meter = provider.meter(METER_NAME);
    (provider, meter)
}

fn build_otlp_metric_exporter(
    exporter: ExporterConfig,
    temporality: Temporality,
) -> Result<opentelemetry_otlp::MetricExporter> {
    match exporter {
        ExporterConfig::None | ExporterConfig::InMemory(_) => Err(PipeError::ExporterDisabled),
        ExporterConfig::OtlpGrpc { endpoint, headers } => {
            debug!("Using OTLP Grpc exporter for metrics: {endpoint}");

            let header_map = build_header_map(&headers);

            opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .with_temporality(temporality)
                .with_metadata(MetadataMap::from_headers(header_map))
                .build()
                .map_err(|source| PipeError::ExporterBuild { source })
        }
        ExporterConfig::OtlpHttp {
            endpoint,
            headers,
            protocol,
        } => {
            debug!("Using OTLP Http exporter for metrics: {endpoint}");

            let protocol = match protocol {
                HttpProtocol::Binary => Protocol::HttpBinary,
                HttpProtocol::Json => Protocol::HttpJson,
            };

            opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_endpoint(endpoint)
                .with_temporality(temporality)
                .with_protocol(protocol)
                .with_headers(headers)
                .build()
                .map_err(|source| PipeError::ExporterBuild { source })
        }
    }
}

fn build_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        if let Ok(name) = HeaderName::from_bytes(key.as_bytes())
            && let Ok(val) = HeaderValue::from_str(value)
        {
            header_map.insert(name, val);
        }
    }
    header_map
}
