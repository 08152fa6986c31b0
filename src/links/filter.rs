use futures::{stream, StreamExt};
use reqwest::Client;
use url::Url;

use super::resolve::{host_matches_domain, resolve, ResolveRequest};
use super::ResolverSettings;

/// File host whose links are kept.
pub const TARGET_DOMAIN: &str = "mega.nz";
/// Path segment of viewer pages on the target host.
pub const VIEWER_SEGMENT: &str = "file";
/// Path segment replacing [`VIEWER_SEGMENT`] to obtain an embeddable URL.
pub const EMBED_SEGMENT: &str = "embed";
/// Candidates examined per batch; links past this bound are never requested.
pub const MAX_CANDIDATES: usize = 5;

/// Resolves candidate links and keeps the first one hosted on [`TARGET_DOMAIN`].
#[derive(Clone, Debug)]
pub struct LinkFilter {
    client: Client,
    settings: ResolverSettings,
}

impl LinkFilter {
    pub fn new(client: Client, settings: ResolverSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Returns at most one link: the first candidate, in input order, whose
    /// resolved URL belongs to the target domain, rewritten to its embed form.
    ///
    /// Candidates are resolved concurrently; failures are logged and dropped.
    #[tracing::instrument(name = "links.filter", skip_all, fields(candidates = links.len()))]
    pub async fn filter(&self, links: &[String]) -> Vec<String> {
        let batch = &links[..links.len().min(MAX_CANDIDATES)];

        let found = match self.settings.batch_deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.first_target(batch)).await {
                    Ok(found) => found,
                    Err(_) => {
                        tracing::warn!(
                            deadline_ms = deadline.as_millis() as u64,
                            "link batch deadline elapsed; no link selected"
                        );
                        None
                    }
                }
            }
            None => self.first_target(batch).await,
        };

        found.map(String::from).into_iter().collect()
    }

    async fn first_target(&self, batch: &[String]) -> Option<Url> {
        // Owned links keep the batch future `Send` for the axum handler.
        let mut outcomes: Vec<(usize, Option<Url>)> =
            stream::iter(batch.iter().cloned().enumerate())
                .map(|(index, link)| async move { (index, self.resolve_candidate(&link).await) })
                .buffer_unordered(MAX_CANDIDATES)
                .collect()
                .await;

        // Completion order is arbitrary; selection must follow input order.
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().find_map(|(_, url)| url)
    }

    async fn resolve_candidate(&self, link: &str) -> Option<Url> {
        let url = match Url::parse(link.trim()) {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!(link, %error, "skipping malformed download link");
                record_outcome("invalid");
                return None;
            }
        };

        let request = ResolveRequest {
            client: self.client.clone(),
            url,
            max_hops: self.settings.max_hops,
            retry_policy: self.settings.retry_policy,
            request_timeout: self.settings.request_timeout,
            stop_at_domain: Some(TARGET_DOMAIN.to_string()),
        };

        match resolve(request).await {
            Ok(resolution) if host_matches_domain(&resolution.final_url, TARGET_DOMAIN) => {
                record_outcome("target");
                Some(to_embed_url(resolution.final_url))
            }
            Ok(resolution) => {
                tracing::debug!(
                    link,
                    final_url = %resolution.final_url,
                    "discarding link outside the target domain"
                );
                record_outcome("other");
                None
            }
            Err(error) => {
                tracing::warn!(link, %error, "failed to resolve download link");
                record_outcome("failed");
                None
            }
        }
    }
}

/// Replaces the first `file` path segment with `embed`; other URLs are
/// returned unchanged.
pub fn to_embed_url(mut url: Url) -> Url {
    let Some(segments) = url.path_segments() else {
        return url;
    };
    let mut segments: Vec<String> = segments.map(str::to_owned).collect();

    let Some(position) = segments.iter().position(|segment| segment == VIEWER_SEGMENT) else {
        return url;
    };
    segments[position] = EMBED_SEGMENT.to_owned();

    // Segments are still percent-encoded, so `set_path` keeps them verbatim.
    url.set_path(&format!("/{}", segments.join("/")));
    url
}

#[cfg(feature = "telemetry")]
fn record_outcome(result: &'static str) {
    metrics::counter!("relay_link_resolutions_total", "result" => result).increment(1);
}

#[cfg(not(feature = "telemetry"))]
fn record_outcome(_result: &'static str) {}
