use anyhow::Context;
use clap::Parser;
use metrics_pipe::HttpProtocol;
use metrics_pipe::MetricsConfig;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Emit a few heartbeat metrics through a process-wide session.
///
/// With `--endpoint` the session exports over OTLP/HTTP; otherwise the
/// configuration is read from `METRICS_PIPE_CONFIG` or the
/// `METRICS_PIPE_*` environment variables.
#[derive(Debug, Parser)]
#[clap(bin_name = "metrics-pipe")]
struct Cli {
    /// OTLP/HTTP metrics endpoint, e.g. http://localhost:4318/v1/metrics.
    #[arg(long)]
    endpoint: Option<String>,

    /// Deployment environment tag attached to every data point.
    #[arg(long, default_value = "dev")]
    environment: String,

    /// Number of heartbeats to emit.
    #[arg(long, default_value_t = 1)]
    count: u64,

    /// Pause between heartbeats, in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let provider = metrics_pipe::global();
    let session = match &cli.endpoint {
        Some(endpoint) => provider
            .start_with(MetricsConfig::otlp_http(
                cli.environment.clone(),
                "metrics-pipe",
                env!("CARGO_PKG_VERSION"),
                endpoint.clone(),
                HttpProtocol::Binary,
            ))
            .context("failed to start metrics session")?,
        None => provider
            .start()
            .context("failed to start metrics session from the environment")?,
    };

    for beat in 0..cli.count {
        let _timer = session.start_timer("pipe.heartbeat.duration_ms", &[])?;
        session.counter("pipe.heartbeat", 1, &[("environment", cli.environment.as_str())])?;
        info!("heartbeat {} of {}", beat + 1, cli.count);
        std::thread::sleep(Duration::from_millis(cli.interval_ms));
    }

    let stopped = provider
        .stop()
        .context("failed to stop metrics session")?;
    if let Some(session) = stopped {
        info!("session stopped: {}", session.is_stopped());
    }
    Ok(())
}
