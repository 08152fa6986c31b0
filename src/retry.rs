use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use reqwest::{header::LOCATION, Client, Request, Response, StatusCode};
use tower::retry::{Policy, Retry};
use tower::{Service, ServiceExt};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Fixed-delay retry settings applied to every individual request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Number of re-attempts after the initial request.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Total number of requests issued before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

/// Redirect statuses the resolver follows through their `Location` header.
pub(crate) fn is_followable_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Any status that is neither a success nor a followable redirect counts as a
/// failed attempt.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    !status.is_success() && !is_followable_redirect(status)
}

/// A redirect without a readable `Location` cannot be followed, so it is
/// classified like any other failed response.
pub(crate) fn is_retryable_response(response: &Response) -> bool {
    let status = response.status();
    if is_followable_redirect(status) {
        return response
            .headers()
            .get(LOCATION)
            .and_then(|location| location.to_str().ok())
            .is_none();
    }
    is_retryable_status(status)
}

/// Executes the provided request, retrying failed attempts after a fixed delay.
///
/// A response is returned as soon as one attempt yields a success or a
/// followable redirect. Once the budget is spent the last outcome is handed
/// back unchanged, which may still be an error status.
pub(crate) async fn execute_with_retry(
    client: Client,
    request: Request,
    policy: RetryPolicy,
) -> RetryAttempt {
    let attempts = Arc::new(AtomicU32::new(1));
    let retry_policy = FixedDelayPolicy::new(policy, attempts.clone());
    let retry_service = Retry::new(retry_policy, ReqwestService::new(client));

    let result = retry_service.oneshot(request).await;

    RetryAttempt {
        attempts: attempts.load(Ordering::SeqCst),
        result,
    }
}

pub(crate) struct RetryAttempt {
    attempts: u32,
    result: Result<Response, reqwest::Error>,
}

impl RetryAttempt {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn into_result(self) -> Result<Response, reqwest::Error> {
        self.result
    }
}

#[derive(Clone)]
struct FixedDelayPolicy {
    policy: RetryPolicy,
    attempt: u32,
    attempts: Arc<AtomicU32>,
}

impl FixedDelayPolicy {
    fn new(policy: RetryPolicy, attempts: Arc<AtomicU32>) -> Self {
        Self {
            policy,
            attempt: 1,
            attempts,
        }
    }
}

impl Policy<Request, Response, reqwest::Error> for FixedDelayPolicy {
    type Future = Pin<Box<dyn Future<Output = Self> + Send>>;

    fn retry(
        &self,
        request: &Request,
        result: Result<&Response, &reqwest::Error>,
    ) -> Option<Self::Future> {
        let retryable = match result {
            Ok(response) => is_retryable_response(response),
            Err(_) => true,
        };

        if !retryable || self.attempt >= self.policy.max_attempts() {
            return None;
        }

        let delay = self.policy.delay();
        let next_attempt = self.attempt + 1;
        self.attempts.store(next_attempt, Ordering::SeqCst);

        match result {
            Ok(response) => tracing::debug!(
                url = %request.url(),
                status = response.status().as_u16(),
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying request after error status"
            ),
            Err(error) => tracing::debug!(
                url = %request.url(),
                %error,
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying request after transport error"
            ),
        }

        let policy = self.policy;
        let attempts = self.attempts.clone();
        Some(Box::pin(async move {
            tokio::time::sleep(delay).await;
            Self {
                policy,
                attempt: next_attempt,
                attempts,
            }
        }))
    }

    fn clone_request(&self, request: &Request) -> Option<Request> {
        request.try_clone()
    }
}

#[derive(Clone)]
struct ReqwestService {
    client: Client,
}

impl ReqwestService {
    fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Service<Request> for ReqwestService {
    type Response = Response;
    type Error = reqwest::Error;
    type Future = BoxFuture<'static, Result<Response, reqwest::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move { client.execute(request).await })
    }
}
