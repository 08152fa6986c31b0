use std::path::{Path, PathBuf};
use std::time::Duration;

use config as config_rs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::links::ResolverSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenerConfig,
    pub upstream: UpstreamConfig,
    pub resolver: ResolverSettings,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the episode metadata API.
    pub origin: Url,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to load configuration from {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config_rs::ConfigError,
    },

    #[error("configuration validation error at {context}: {message}")]
    Validation { context: String, message: String },
}

impl Config {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        // `config` reports a missing file as an opaque foreign error.
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let settings = config_rs::Config::builder()
            .add_source(config_rs::File::from(path))
            .build()
            .map_err(|source| load_error(path, source))?;

        let raw: RawConfig = settings
            .try_deserialize()
            .map_err(|source| load_error(path, source))?;

        raw.try_into()
    }
}

fn load_error(path: &Path, source: config_rs::ConfigError) -> ConfigError {
    ConfigError::Load {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    listen: RawListener,
    upstream: RawUpstream,
    #[serde(default)]
    resolver: RawResolver,
}

#[derive(Debug, Deserialize)]
struct RawListener {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct RawUpstream {
    origin: String,
    connect_timeout_ms: u64,
    request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawResolver {
    max_hops: usize,
    max_retries: u32,
    retry_delay_ms: u64,
    request_timeout_ms: u64,
    batch_deadline_ms: Option<u64>,
}

impl Default for RawResolver {
    fn default() -> Self {
        let defaults = ResolverSettings::default();
        Self {
            max_hops: defaults.max_hops,
            max_retries: defaults.retry_policy.max_retries(),
            retry_delay_ms: defaults.retry_policy.delay().as_millis() as u64,
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
            batch_deadline_ms: None,
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            listen: parse_listener(raw.listen)?,
            upstream: parse_upstream(raw.upstream)?,
            resolver: parse_resolver(raw.resolver)?,
        })
    }
}

fn parse_listener(raw: RawListener) -> Result<ListenerConfig, ConfigError> {
    if raw.host.trim().is_empty() {
        return Err(validation_error("listen.host", "host must not be empty"));
    }

    if raw.port == 0 {
        return Err(validation_error(
            "listen.port",
            "port must be greater than zero",
        ));
    }

    Ok(ListenerConfig {
        host: raw.host,
        port: raw.port,
    })
}

fn parse_upstream(raw: RawUpstream) -> Result<UpstreamConfig, ConfigError> {
    let origin = Url::parse(raw.origin.trim())
        .map_err(|err| validation_error("upstream.origin", format!("invalid URL: {err}")))?;

    if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
        return Err(validation_error(
            "upstream.origin",
            "origin must be an absolute http(s) URL",
        ));
    }

    let connect_timeout =
        duration_from_millis(raw.connect_timeout_ms, "upstream.connect_timeout_ms")?;
    let request_timeout =
        duration_from_millis(raw.request_timeout_ms, "upstream.request_timeout_ms")?;

    Ok(UpstreamConfig {
        origin,
        connect_timeout,
        request_timeout,
    })
}

fn parse_resolver(raw: RawResolver) -> Result<ResolverSettings, ConfigError> {
    let request_timeout =
        duration_from_millis(raw.request_timeout_ms, "resolver.request_timeout_ms")?;
    let retry_delay = duration_from_millis(raw.retry_delay_ms, "resolver.retry_delay_ms")?;
    let batch_deadline = raw
        .batch_deadline_ms
        .map(|value| duration_from_millis(value, "resolver.batch_deadline_ms"))
        .transpose()?;

    Ok(ResolverSettings {
        max_hops: raw.max_hops,
        retry_policy: RetryPolicy::new(raw.max_retries, retry_delay),
        request_timeout,
        batch_deadline,
    })
}

fn duration_from_millis(value: u64, context: &str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(validation_error(
            context,
            "duration must be greater than zero",
        ));
    }

    Ok(Duration::from_millis(value))
}

fn validation_error(context: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        context: context.into(),
        message: message.into(),
    }
}
