use std::time::Duration;

use reqwest::{header::LOCATION, Client, Response, StatusCode};
use thiserror::Error;
use url::Url;

use crate::retry::{self, RetryPolicy};

pub const DEFAULT_MAX_HOPS: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ResolveRequest {
    pub client: Client,
    pub url: Url,
    /// Maximum number of redirect responses followed.
    pub max_hops: usize,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
    /// Redirects landing on this domain end resolution without requesting the
    /// target itself.
    pub stop_at_domain: Option<String>,
}

impl ResolveRequest {
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            max_hops: DEFAULT_MAX_HOPS,
            retry_policy: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_at_domain: None,
        }
    }
}

/// How a successful resolution came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The final URL answered with a success status.
    Reached,
    /// A redirect pointed at the stop domain.
    StopDomain,
    /// The hop budget ran out; the final URL is the last `Location` seen.
    HopLimit,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub final_url: Url,
    pub termination: Termination,
    pub redirects: usize,
    pub attempts: u32,
    pub chain: Vec<Url>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to build request for `{url}`: {source}")]
    RequestBuild {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to `{url}` failed after {attempts} attempt(s): {source}")]
    Transport {
        url: Url,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("`{url}` answered with status {status} after {attempts} attempt(s)")]
    Status {
        url: Url,
        status: StatusCode,
        attempts: u32,
    },

    #[error("redirect from `{url}` is missing a location header")]
    MissingLocation { url: Url },

    #[error("redirect from `{url}` carries a location header that is not valid UTF-8")]
    InvalidLocationEncoding { url: Url },

    #[error("invalid redirect location `{location}`: {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },
}

/// Follows redirects from `request.url` until a success, the stop domain, or
/// the end of the hop budget.
///
/// Every hop is issued through the fixed-delay retry executor, so a flaky hop
/// is retried in place and never consumes hop budget. A redirect whose
/// `Location` is missing or unreadable is retried too and only becomes an
/// error once the retry budget is spent.
#[tracing::instrument(name = "links.resolve", skip(request), fields(url = %request.url))]
pub async fn resolve(request: ResolveRequest) -> Result<Resolution, ResolveError> {
    let mut current_url = request.url.clone();
    let mut redirects = 0usize;
    let mut total_attempts = 0u32;
    let mut chain = Vec::new();

    loop {
        chain.push(current_url.clone());

        let req = request
            .client
            .get(current_url.clone())
            .timeout(request.request_timeout)
            .build()
            .map_err(|source| ResolveError::RequestBuild {
                url: current_url.clone(),
                source,
            })?;

        let attempt =
            retry::execute_with_retry(request.client.clone(), req, request.retry_policy).await;
        total_attempts += attempt.attempts();
        if attempt.retries() > 0 {
            tracing::debug!(
                url = %current_url,
                retries = attempt.retries(),
                "hop needed retries"
            );
        }

        let response = attempt
            .into_result()
            .map_err(|source| ResolveError::Transport {
                url: current_url.clone(),
                attempts: total_attempts,
                source,
            })?;

        let status = response.status();

        if status.is_success() {
            return Ok(Resolution {
                final_url: response.url().clone(),
                termination: Termination::Reached,
                redirects,
                attempts: total_attempts,
                chain,
            });
        }

        if !retry::is_followable_redirect(status) {
            return Err(ResolveError::Status {
                url: current_url,
                status,
                attempts: total_attempts,
            });
        }

        let next_url = next_location(&response, &current_url)?;
        redirects += 1;

        let termination = if request
            .stop_at_domain
            .as_deref()
            .is_some_and(|domain| host_matches_domain(&next_url, domain))
        {
            Some(Termination::StopDomain)
        } else if redirects > request.max_hops {
            tracing::debug!(
                limit = request.max_hops,
                location = %next_url,
                "hop budget exhausted; keeping last location"
            );
            Some(Termination::HopLimit)
        } else {
            None
        };

        if let Some(termination) = termination {
            chain.push(next_url.clone());
            return Ok(Resolution {
                final_url: next_url,
                termination,
                redirects,
                attempts: total_attempts,
                chain,
            });
        }

        current_url = next_url;
    }
}

fn next_location(response: &Response, current_url: &Url) -> Result<Url, ResolveError> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| ResolveError::MissingLocation {
            url: current_url.clone(),
        })?;
    let location = location
        .to_str()
        .map_err(|_| ResolveError::InvalidLocationEncoding {
            url: current_url.clone(),
        })?;

    current_url
        .join(location)
        .map_err(|source| ResolveError::InvalidLocation {
            location: location.to_string(),
            source,
        })
}

/// Returns true when the URL's host is `domain` or one of its subdomains.
pub fn host_matches_domain(url: &Url, domain: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_end_matches('.');

    if host.eq_ignore_ascii_case(domain) {
        return true;
    }

    host.len() > domain.len()
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
        && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain)
}
