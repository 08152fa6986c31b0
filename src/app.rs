//! Axum application builder utilities.
//!
//! The router exposes the scrape endpoint plus a readiness probe. Handlers
//! stay thin; the relay and link resolution logic live in their own modules.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[cfg(feature = "telemetry")]
use axum::{
    body::Body,
    http::{header, HeaderValue, Request},
};
#[cfg(feature = "telemetry")]
use std::time::Instant;
#[cfg(feature = "telemetry")]
use tower_http::trace::{DefaultOnResponse, TraceLayer};
#[cfg(feature = "telemetry")]
use tower_http::LatencyUnit;
#[cfg(feature = "telemetry")]
use tracing::Level;

use crate::{
    relay::{RelayError, SCRAPE_ERROR_MESSAGE},
    state::AppState,
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Constructs the Axum router used by the relay.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/scrape/:endpoint", get(scrape_episode));

    #[cfg(feature = "telemetry")]
    let router = router.route("/metrics", get(prometheus_metrics));

    let router = router.with_state(state);

    #[cfg(feature = "telemetry")]
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<Body>| {
                let user_agent = request
                    .headers()
                    .get(header::USER_AGENT)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_agent = %user_agent,
                )
            })
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Millis),
            ),
    );

    router
}

/// Basic health-check handler used for readiness probes.
async fn health_check() -> impl IntoResponse {
    #[cfg(feature = "telemetry")]
    metrics::counter!("relay_health_checks_total").increment(1);

    StatusCode::OK
}

/// Relays the episode page for `endpoint` with its download links resolved.
async fn scrape_episode(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
) -> Response {
    #[cfg(feature = "telemetry")]
    let start = Instant::now();

    let response = match state.relay().scrape(&endpoint).await {
        Ok(body) => Json(body).into_response(),
        Err(error) => map_relay_error(error),
    };

    #[cfg(feature = "telemetry")]
    record_http_metrics("scrape", response.status(), start.elapsed());

    response
}

/// Logs the failure in full and answers with the fixed client-facing body.
fn map_relay_error(error: RelayError) -> Response {
    tracing::error!(error = ?error, "failed to fetch episode data");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: SCRAPE_ERROR_MESSAGE,
        }),
    )
        .into_response()
}

#[cfg(feature = "telemetry")]
async fn prometheus_metrics() -> impl IntoResponse {
    match crate::scrape_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder unavailable",
        )
            .into_response(),
    }
}

#[cfg(feature = "telemetry")]
fn record_http_metrics(route: &str, status: StatusCode, latency: std::time::Duration) {
    let status_label = status.as_u16().to_string();

    metrics::counter!(
        "relay_http_responses_total",
        "route" => route.to_owned(),
        "status" => status_label.clone(),
    )
    .increment(1);
    metrics::histogram!(
        "relay_http_response_duration_seconds",
        "route" => route.to_owned(),
        "status" => status_label,
    )
    .record(latency.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{LinkFilter, ResolverSettings};
    use crate::relay::EpisodeRelay;
    use crate::test_support::{closed_port_url, no_redirect_client, spawn_server};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt; // for `oneshot`
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;
    use url::Url;

    fn state_with_origin(origin: &str) -> AppState {
        let links = LinkFilter::new(no_redirect_client(), ResolverSettings::default());
        AppState::new(EpisodeRelay::new(
            reqwest::Client::new(),
            Url::parse(origin).unwrap(),
            links,
        ))
    }

    #[tokio::test]
    async fn health_route_returns_success() {
        let app = build_router(state_with_origin("http://127.0.0.1:1"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_fixed_error_body() {
        let app = build_router(state_with_origin(&closed_port_url()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/scrape/show-ep-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body to bytes");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body, serde_json::json!({ "error": "Failed to fetch data" }));
    }

    #[tokio::test]
    async fn scrape_route_returns_reshaped_episode() {
        let upstream = spawn_server(axum::Router::new().route(
            "/api/v1/episode/show-ep-1",
            get(|| async {
                Json(serde_json::json!({
                    "title": "Show",
                    "list_episode": [
                        {"list_episode_title": "Episode 1", "list_episode_endpoint": "show-ep-1"}
                    ],
                    "quality": {
                        "low_quality": {"quality": "360p", "size": "40 MB", "download_links": []}
                    }
                }))
            }),
        ))
        .await;

        let app = build_router(state_with_origin(&upstream.url("/")));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/scrape/show-ep-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body to bytes");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(
            body,
            serde_json::json!({
                "title": "Show",
                "episodes": [{"episode_title": "Episode 1", "episode_endpoint": "show-ep-1"}],
                "quality_list": {
                    "low_quality": {"quality": "360p", "size": "40 MB", "download_links": []}
                }
            })
        );
    }

    #[tokio::test]
    async fn map_relay_error_hides_upstream_details() {
        let log_writer = SharedLogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log_writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        let error = RelayError::UpstreamStatus {
            url: Url::parse("https://secret.internal/api/v1/episode/x").unwrap(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };

        let response = with_default(subscriber, || map_relay_error(error));
        let (parts, body) = response.into_parts();
        assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(body, usize::MAX).await.expect("body to bytes");
        let body_text = String::from_utf8(bytes.to_vec()).expect("utf8 body");
        assert_eq!(body_text, r#"{"error":"Failed to fetch data"}"#);
        assert!(!body_text.contains("secret.internal"));

        let logs = log_writer.contents();
        assert!(logs.contains("secret.internal"), "logs: {logs}");
        assert!(logs.contains("UpstreamStatus"), "logs: {logs}");
    }

    #[derive(Clone, Default)]
    struct SharedLogBuffer {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl SharedLogBuffer {
        fn contents(&self) -> String {
            let data = self.inner.lock().expect("log buffer lock").clone();
            String::from_utf8_lossy(&data).into_owned()
        }
    }

    struct SharedWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut guard = self.inner.lock().expect("log buffer lock");
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for SharedLogBuffer {
        type Writer = SharedWriter;

        fn make_writer(&'a self) -> Self::Writer {
            SharedWriter {
                inner: Arc::clone(&self.inner),
            }
        }
    }
}
