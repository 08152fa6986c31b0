use reqwest::Client;
use thiserror::Error;

use crate::links::LinkFilter;
use crate::relay::EpisodeRelay;

#[cfg(feature = "config-loader")]
use crate::config::Config;

#[cfg(feature = "config-loader")]
const USER_AGENT: &str = concat!("episode-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to build {purpose} HTTP client: {source}")]
    ClientBuild {
        purpose: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Top-level application state shared across the Axum router.
#[derive(Clone, Debug)]
pub struct AppState {
    relay: EpisodeRelay,
}

impl AppState {
    pub fn new(relay: EpisodeRelay) -> Self {
        Self { relay }
    }

    /// Builds the upstream and resolver clients described by `config`.
    ///
    /// The resolver client never follows redirects on its own; every hop is
    /// counted against the configured budget instead.
    #[cfg(feature = "config-loader")]
    pub fn from_config(config: &Config) -> Result<Self, StateError> {
        let upstream_client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.upstream.connect_timeout)
            .timeout(config.upstream.request_timeout)
            .build()
            .map_err(|source| StateError::ClientBuild {
                purpose: "upstream",
                source,
            })?;

        let resolver_client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.resolver.request_timeout)
            .build()
            .map_err(|source| StateError::ClientBuild {
                purpose: "resolver",
                source,
            })?;

        let links = LinkFilter::new(resolver_client, config.resolver);
        let relay = EpisodeRelay::new(upstream_client, config.upstream.origin.clone(), links);

        Ok(Self::new(relay))
    }

    pub fn relay(&self) -> &EpisodeRelay {
        &self.relay
    }
}
