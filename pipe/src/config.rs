use crate::error::PipeError;
use crate::error::Result;
use crate::validation::validate_tag_key;
use crate::validation::validate_tag_value;
use crate::validation::validate_tags;
use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub(crate) const CONFIG_PATH_ENV_VAR: &str = "METRICS_PIPE_CONFIG";
pub(crate) const EXPORTER_ENV_VAR: &str = "METRICS_PIPE_EXPORTER";
pub(crate) const ENDPOINT_ENV_VAR: &str = "METRICS_PIPE_ENDPOINT";
pub(crate) const HTTP_PROTOCOL_ENV_VAR: &str = "METRICS_PIPE_HTTP_PROTOCOL";
pub(crate) const ENVIRONMENT_ENV_VAR: &str = "METRICS_PIPE_ENVIRONMENT";
pub(crate) const SERVICE_NAME_ENV_VAR: &str = "METRICS_PIPE_SERVICE_NAME";
pub(crate) const SERVICE_VERSION_ENV_VAR: &str = "METRICS_PIPE_SERVICE_VERSION";
pub(crate) const EXPORT_INTERVAL_ENV_VAR: &str = "METRICS_PIPE_EXPORT_INTERVAL_MS";

const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_SERVICE_NAME: &str = "metrics-pipe";
const DEFAULT_SERVICE_VERSION: &str = "0.0.0";

#[derive(Clone, Debug)]
pub enum HttpProtocol {
    /// HTTP with binary protobuf payloads.
    Binary,
    /// HTTP with JSON payloads.
    Json,
}

#[derive(Clone, Debug)]
pub enum ExporterConfig {
    None,
    InMemory(InMemoryMetricExporter),
    OtlpGrpc {
        endpoint: String,
        headers: HashMap<String, String>,
    },
    OtlpHttp {
        endpoint: String,
        headers: HashMap<String, String>,
        protocol: HttpProtocol,
    },
}

/// Settings needed to construct a metrics session: service identity,
/// exporter selection, and tags attached to every data point.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub(crate) environment: String,
    pub(crate) service_name: String,
    pub(crate) service_version: String,
    pub(crate) exporter: ExporterConfig,
    pub(crate) export_interval: Option<Duration>,
    pub(crate) default_tags: BTreeMap<String, String>,
}

impl MetricsConfig {
    fn new(
        environment: impl Into<String>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        exporter: ExporterConfig,
    ) -> Self {
        Self {
            environment: environment.into(),
            service_name: service_name.into(),
            service_version: service_version.into(),
            exporter,
            export_interval: None,
            default_tags: BTreeMap::new(),
        }
    }

    pub fn otlp_grpc(
        environment: impl Into<String>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::new(
            environment,
            service_name,
            service_version,
            ExporterConfig::OtlpGrpc {
                endpoint: endpoint.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn otlp_http(
        environment: impl Into<String>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        endpoint: impl Into<String>,
        protocol: HttpProtocol,
    ) -> Self {
        Self::new(
            environment,
            service_name,
            service_version,
            ExporterConfig::OtlpHttp {
                endpoint: endpoint.into(),
                headers: HashMap::new(),
                protocol,
            },
        )
    }

    /// Create an in-memory config (used in tests).
    pub fn in_memory(
        environment: impl Into<String>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        exporter: InMemoryMetricExporter,
    ) -> Self {
        Self::new(
            environment,
            service_name,
            service_version,
            ExporterConfig::InMemory(exporter),
        )
    }

    pub fn disabled(
        environment: impl Into<String>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
    ) -> Self {
        Self::new(
            environment,
            service_name,
            service_version,
            ExporterConfig::None,
        )
    }

    /// Override the interval between periodic metric exports.
    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = Some(interval);
        self
    }

    /// Add a default tag that will be sent with every metric.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let value = value.into();
        validate_tag_key(&key)?;
        validate_tag_value(&value)?;
        self.default_tags.insert(key, value);
        Ok(self)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn exporter(&self) -> &ExporterConfig {
        &self.exporter
    }

    pub fn export_interval(&self) -> Option<Duration> {
        self.export_interval
    }

    pub fn default_tags(&self) -> &BTreeMap<String, String> {
        &self.default_tags
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(PipeError::invalid_config("service_name cannot be empty"));
        }
        if self.environment.is_empty() {
            return Err(PipeError::invalid_config("environment cannot be empty"));
        }
        match &self.exporter {
            ExporterConfig::OtlpGrpc { endpoint, .. }
            | ExporterConfig::OtlpHttp { endpoint, .. } => {
                if endpoint.is_empty() {
                    return Err(PipeError::invalid_config("exporter endpoint cannot be empty"));
                }
            }
            ExporterConfig::None | ExporterConfig::InMemory(_) => {}
        }
        validate_tags(&self.default_tags)
    }
}

/// Zero-argument configuration source queried by
/// [`SessionProvider::start`](crate::SessionProvider::start).
pub trait ConfigSource: Send + Sync {
    fn fetch(&self) -> Result<MetricsConfig>;
}

/// Reads configuration from `METRICS_PIPE_CONFIG` (a TOML file) or, when
/// that is unset, from individual `METRICS_PIPE_*` environment variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn fetch(&self) -> Result<MetricsConfig> {
        if let Ok(path) = env::var(CONFIG_PATH_ENV_VAR) {
            return load_toml_file(Path::new(&path));
        }
        from_env_vars()
    }
}

pub(crate) fn load_toml_file(path: &Path) -> Result<MetricsConfig> {
    let contents = fs::read_to_string(path).map_err(|error| {
        PipeError::configuration(format!("failed to read {}: {error}", path.display()))
    })?;
    let parsed: ConfigToml = toml::from_str(&contents).map_err(|error| {
        PipeError::invalid_config(format!("failed to parse {}: {error}", path.display()))
    })?;
    parsed.into_config()
}

fn from_env_vars() -> Result<MetricsConfig> {
    let Ok(kind) = env::var(EXPORTER_ENV_VAR) else {
        return Err(PipeError::configuration(format!(
            "{EXPORTER_ENV_VAR} is not set"
        )));
    };

    let environment =
        env::var(ENVIRONMENT_ENV_VAR).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
    let service_name =
        env::var(SERVICE_NAME_ENV_VAR).unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());
    let service_version =
        env::var(SERVICE_VERSION_ENV_VAR).unwrap_or_else(|_| DEFAULT_SERVICE_VERSION.to_string());

    let exporter = match kind.as_str() {
        "none" => ExporterConfig::None,
        "otlp-grpc" => ExporterConfig::OtlpGrpc {
            endpoint: require_endpoint()?,
            headers: HashMap::new(),
        },
        "otlp-http" => ExporterConfig::OtlpHttp {
            endpoint: require_endpoint()?,
            headers: HashMap::new(),
            protocol: parse_http_protocol(
                env::var(HTTP_PROTOCOL_ENV_VAR).ok().as_deref(),
            )?,
        },
        other => {
            return Err(PipeError::invalid_config(format!(
                "unknown exporter kind: {other}"
            )));
        }
    };

    let mut config = MetricsConfig::new(environment, service_name, service_version, exporter);
    if let Ok(interval) = env::var(EXPORT_INTERVAL_ENV_VAR) {
        let millis: u64 = interval.parse().map_err(|_| {
            PipeError::invalid_config(format!(
                "{EXPORT_INTERVAL_ENV_VAR} must be an integer number of milliseconds: {interval}"
            ))
        })?;
        config = config.with_export_interval(Duration::from_millis(millis));
    }
    Ok(config)
}

fn require_endpoint() -> Result<String> {
    env::var(ENDPOINT_ENV_VAR)
        .map_err(|_| PipeError::invalid_config(format!("{ENDPOINT_ENV_VAR} is not set")))
}

fn parse_http_protocol(value: Option<&str>) -> Result<HttpProtocol> {
    match value {
        None | Some("binary") => Ok(HttpProtocol::Binary),
        Some("json") => Ok(HttpProtocol::Json),
        Some(other) => Err(PipeError::invalid_config(format!(
            "unknown HTTP protocol: {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ConfigToml {
    environment: Option<String>,
    service_name: Option<String>,
    service_version: Option<String>,
    export_interval_ms: Option<u64>,
    exporter: ExporterToml,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExporterToml {
    kind: String,
    endpoint: Option<String>,
    protocol: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl ConfigToml {
    fn into_config(self) -> Result<MetricsConfig> {
        let ExporterToml {
            kind,
            endpoint,
            protocol,
            headers,
        } = self.exporter;
        let require_endpoint = |endpoint: Option<String>, kind: &str| {
            endpoint.ok_or_else(|| {
                PipeError::invalid_config(format!("exporter.endpoint is required for {kind}"))
            })
        };
        let exporter = match kind.as_str() {
            "none" => ExporterConfig::None,
            "otlp-grpc" => ExporterConfig::OtlpGrpc {
                endpoint: require_endpoint(endpoint, "otlp-grpc")?,
                headers,
            },
            "otlp-http" => ExporterConfig::OtlpHttp {
                endpoint: require_endpoint(endpoint, "otlp-http")?,
                headers,
                protocol: parse_http_protocol(protocol.as_deref())?,
            },
            other => {
                return Err(PipeError::invalid_config(format!(
                    "unknown exporter kind: {other}"
                )));
            }
        };

        let mut config = MetricsConfig::new(
            self.environment
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            self.service_name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            self.service_version
                .unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_string()),
            exporter,
        );
        if let Some(millis) = self.export_interval_ms {
            config = config.with_export_interval(Duration::from_millis(millis));
        }
        for (key, value) in self.tags {
            config = config.with_tag(key, value)?;
        }
        Ok(config)
    }
}
