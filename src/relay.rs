//! Episode metadata relay.
//!
//! Fetches an episode page from the upstream metadata API, renames its fields
//! into the relay's response shape and replaces each quality tier's download
//! links with the single embeddable link selected by [`LinkFilter`].

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::links::LinkFilter;

/// Body message returned to clients whenever a scrape fails.
pub const SCRAPE_ERROR_MESSAGE: &str = "Failed to fetch data";

const EPISODE_PATH: [&str; 3] = ["api", "v1", "episode"];

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream origin `{origin}` cannot carry an episode path")]
    InvalidOrigin { origin: Url },

    #[error("error requesting episode metadata from `{url}`: {source}")]
    UpstreamRequest {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("episode metadata request to `{url}` returned status {status}")]
    UpstreamStatus { url: Url, status: StatusCode },

    #[error("failed to decode episode metadata from `{url}`: {source}")]
    UpstreamBody {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

/// Episode page as served by the upstream API. Only consumed fields are
/// modelled; anything else in the payload is ignored.
///
/// Descriptive fields are relayed as raw JSON values so that `null` or
/// non-string upstream data passes through untouched. A missing one is
/// relayed as `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEpisode {
    #[serde(default)]
    pub title: Value,
    pub list_episode: Vec<UpstreamEpisodeEntry>,
    #[serde(default)]
    pub quality: Option<UpstreamQualityTiers>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEpisodeEntry {
    #[serde(default)]
    pub list_episode_title: Value,
    #[serde(default)]
    pub list_episode_endpoint: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamQualityTiers {
    #[serde(default)]
    pub low_quality: Option<UpstreamQuality>,
    #[serde(default)]
    pub medium_quality: Option<UpstreamQuality>,
    #[serde(default)]
    pub high_quality: Option<UpstreamQuality>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamQuality {
    #[serde(default)]
    pub quality: Value,
    #[serde(default)]
    pub size: Value,
    pub download_links: Vec<UpstreamDownloadLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamDownloadLink {
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeResponse {
    pub title: Value,
    pub episodes: Vec<Episode>,
    pub quality_list: QualityList,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub episode_title: Value,
    pub episode_endpoint: Value,
}

impl From<UpstreamEpisodeEntry> for Episode {
    fn from(entry: UpstreamEpisodeEntry) -> Self {
        Self {
            episode_title: entry.list_episode_title,
            episode_endpoint: entry.list_episode_endpoint,
        }
    }
}

/// Quality tiers present upstream. Absent tiers are left out of the JSON
/// object rather than serialised as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_quality: Option<Quality>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quality {
    pub quality: Value,
    pub size: Value,
    /// Zero or one embeddable link.
    pub download_links: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct EpisodeRelay {
    client: Client,
    origin: Url,
    links: LinkFilter,
}

impl EpisodeRelay {
    pub fn new(client: Client, origin: Url, links: LinkFilter) -> Self {
        Self {
            client,
            origin,
            links,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn links(&self) -> &LinkFilter {
        &self.links
    }

    /// Builds `{origin}/api/v1/episode/{endpoint}`, encoding the endpoint as a
    /// single path segment.
    pub fn episode_url(&self, endpoint: &str) -> Result<Url, RelayError> {
        let mut url = self.origin.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::InvalidOrigin {
                origin: self.origin.clone(),
            })?
            .pop_if_empty()
            .extend(EPISODE_PATH)
            .push(endpoint);
        Ok(url)
    }

    #[tracing::instrument(name = "relay.scrape", skip(self))]
    pub async fn scrape(&self, endpoint: &str) -> Result<EpisodeResponse, RelayError> {
        let episode = self.fetch_episode(endpoint).await?;
        Ok(self.reshape(episode).await)
    }

    async fn fetch_episode(&self, endpoint: &str) -> Result<UpstreamEpisode, RelayError> {
        let url = self.episode_url(endpoint)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| RelayError::UpstreamRequest {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus { url, status });
        }

        response
            .json::<UpstreamEpisode>()
            .await
            .map_err(|source| RelayError::UpstreamBody { url, source })
    }

    async fn reshape(&self, episode: UpstreamEpisode) -> EpisodeResponse {
        let episodes = episode
            .list_episode
            .into_iter()
            .map(Episode::from)
            .collect();

        let quality_list = match episode.quality {
            Some(tiers) => self.quality_list(tiers).await,
            None => QualityList::default(),
        };

        EpisodeResponse {
            title: episode.title,
            episodes,
            quality_list,
        }
    }

    async fn quality_list(&self, tiers: UpstreamQualityTiers) -> QualityList {
        let (low_quality, medium_quality, high_quality) = tokio::join!(
            self.quality(tiers.low_quality),
            self.quality(tiers.medium_quality),
            self.quality(tiers.high_quality),
        );

        QualityList {
            low_quality,
            medium_quality,
            high_quality,
        }
    }

    async fn quality(&self, tier: Option<UpstreamQuality>) -> Option<Quality> {
        let tier = tier?;
        let candidates: Vec<String> = tier
            .download_links
            .into_iter()
            .map(|download| download.link)
            .collect();
        let download_links = self.links.filter(&candidates).await;

        Some(Quality {
            quality: tier.quality,
            size: tier.size,
            download_links,
        })
    }
}
