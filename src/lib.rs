//! episode-relay library crate.
//!
//! Relays episode metadata from an upstream API and reduces every quality
//! tier's download links to a single embeddable file-host link.

pub mod app;
#[cfg(feature = "config-loader")]
pub mod config;
pub mod links;
pub mod relay;
pub mod retry;
pub mod state;
mod telemetry;

#[cfg(test)]
mod test_support;

/// Installs process-wide logging and, with the `telemetry` feature, the
/// metrics recorder. Must be called once before serving requests.
pub fn init() -> anyhow::Result<()> {
    telemetry::init()
}

/// Renders the current metrics snapshot, if the recorder is installed.
#[cfg(feature = "telemetry")]
pub fn scrape_metrics() -> Option<String> {
    telemetry::prometheus_metrics()
}
