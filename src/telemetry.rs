//! Telemetry and observability primitives for the relay.
//!
//! Structured tracing is always installed. With the `telemetry` feature the
//! global Prometheus recorder is installed as well and kept process-wide so the
//! `/metrics` handler can render it without extra state.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "telemetry")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "telemetry")]
use std::sync::OnceLock;

#[cfg(feature = "telemetry")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the telemetry stack used by the application.
pub(crate) fn init() -> Result<()> {
    init_tracing()?;

    #[cfg(feature = "telemetry")]
    init_metrics()?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to construct tracing filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))?;

    Ok(())
}

#[cfg(feature = "telemetry")]
fn init_metrics() -> Result<()> {
    let recorder = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    PROMETHEUS_HANDLE
        .set(recorder)
        .map_err(|_| anyhow!("Prometheus recorder has already been initialized"))?;

    metrics::describe_counter!(
        "relay_http_responses_total",
        "Total number of HTTP responses emitted by the relay."
    );
    metrics::describe_histogram!(
        "relay_http_response_duration_seconds",
        "Latency histogram (in seconds) for HTTP responses emitted by the relay."
    );
    metrics::describe_counter!(
        "relay_link_resolutions_total",
        "Candidate download links resolved, labelled by outcome (target, other, failed, invalid)."
    );
    metrics::describe_counter!(
        "relay_health_checks_total",
        "Total number of successful /health responses served."
    );

    Ok(())
}

/// Returns the Prometheus metrics encoded in the text exposition format.
#[cfg(feature = "telemetry")]
pub(crate) fn prometheus_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}
