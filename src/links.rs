//! Download link resolution.
//!
//! [`resolve`] follows the redirect chain of a single candidate link while
//! [`filter`] fans a small batch of candidates out concurrently and keeps the
//! first one that lands on the file host the relay serves.

use std::time::Duration;

use crate::retry::RetryPolicy;

pub mod filter;
pub mod resolve;

pub use filter::{to_embed_url, LinkFilter, EMBED_SEGMENT, MAX_CANDIDATES, TARGET_DOMAIN};
pub use resolve::{resolve, Resolution, ResolveError, ResolveRequest, Termination};

/// Budgets applied to every candidate link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    pub max_hops: usize,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
    /// Upper bound for resolving a whole batch. `None` waits for every
    /// candidate to finish or exhaust its budgets.
    pub batch_deadline: Option<Duration>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_hops: resolve::DEFAULT_MAX_HOPS,
            retry_policy: RetryPolicy::default(),
            request_timeout: resolve::DEFAULT_REQUEST_TIMEOUT,
            batch_deadline: None,
        }
    }
}
