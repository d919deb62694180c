//! HTTP surface for the diagnostics service.
//!
//! Every handler owns a cancellation token for its request. If the client
//! goes away, axum drops the handler future and the guard cancels any probe
//! still in flight.

use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ProbeError;
use crate::metrics::HttpMetrics;
use crate::models::{CrossZoneResponse, EgressResult};
use crate::service::DiagnosticsService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: DiagnosticsService,
    pub http_metrics: Arc<HttpMetrics>,
}

impl AppState {
    pub fn new(service: DiagnosticsService) -> Self {
        Self {
            service,
            http_metrics: Arc::new(HttpMetrics::new()),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    code: &'static str,
    message: &'a str,
}

impl IntoResponse for ProbeError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidArgument(_) | Self::FailedPrecondition(_) => StatusCode::BAD_REQUEST,
            Self::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            code: self.code(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/egress/dns/{host}", get(dns_handler))
        .route("/egress/http/{target}", get(http_handler))
        .route("/egress/https/{target}", get(https_handler))
        .route("/egress/https-insecure/{target}", get(https_insecure_handler))
        .route("/crosszone", get(cross_zone_handler))
        .route("/health", get(health_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.http_metrics),
            track_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Diagnostics server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Diagnostics server stopped");
    Ok(())
}

async fn track_metrics(
    State(metrics): State<Arc<HttpMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    metrics.record(&method, &route, response.status().as_u16(), start.elapsed());
    response
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn dns_handler(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<EgressResult>, ProbeError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    Ok(Json(state.service.resolve_host(&cancel, &host).await?))
}

async fn http_handler(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Json<EgressResult>, ProbeError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    Ok(Json(state.service.test_http(&cancel, &target).await?))
}

async fn https_handler(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Json<EgressResult>, ProbeError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    Ok(Json(state.service.test_https(&cancel, &target).await?))
}

async fn https_insecure_handler(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Json<EgressResult>, ProbeError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    Ok(Json(state.service.test_https_insecure(&cancel, &target).await?))
}

async fn cross_zone_handler(
    State(state): State<AppState>,
) -> Result<Json<CrossZoneResponse>, ProbeError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match state.service.cross_zone_sweep(&cancel).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!(code = e.code(), error = %e, "Cross-zone sweep failed");
            Err(e)
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::OtelMetrics;
    use axum::body::{to_bytes, Body};
    use axum::http;
    use tower::ServiceExt;

    fn app(config: Config) -> Router {
        let service = DiagnosticsService::new(config, None, Arc::new(OtelMetrics::new(false)));
        build_router(AppState::new(service))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(Config::default()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_disabled_cross_zone_is_501() {
        let (status, body) = get_json(app(Config::default()), "/crosszone").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["code"], "unimplemented");
    }

    #[tokio::test]
    async fn test_cross_zone_without_client_is_500() {
        let config = Config {
            enable_cross_zone: true,
            ..Config::default()
        };
        let (status, body) = get_json(app(config), "/crosszone").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Kubernetes client not initialized");
    }

    #[tokio::test]
    async fn test_dns_route() {
        let (status, body) = get_json(app(Config::default()), "/egress/dns/127.0.0.1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["resolvedAddresses"][0], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_http_route_reports_failure_in_body() {
        let (status, body) =
            get_json(app(Config::default()), "/egress/http/example.com@1.1.1.1:abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["target"], "example.com:80");
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("failed to resolve DNS server 1.1.1.1:abc"));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ProbeError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (ProbeError::FailedPrecondition("x".into()), StatusCode::BAD_REQUEST),
            (ProbeError::Unimplemented("x".into()), StatusCode::NOT_IMPLEMENTED),
            (ProbeError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
