//! Contains the `/health` endpoints.

use crate::health::HealthState;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;

/// Defines a type of health check.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HealthCheck {
    /// A Kubernetes startup check.
    Startup,
    /// A Kubernetes readiness check.
    Readiness,
    /// A Kubernetes liveliness check.
    Liveness,
    /// A full health check.
    Full,
}

pub trait HealthRoutes {
    /// Provides an API for initiating health checks.
    ///
    /// For readiness checks, which check every store and stream:
    ///
    /// ```http
    /// GET /readyz HTTP/1.1
    /// ```
    ///
    /// For liveness checks, which only confirm the process responds:
    ///
    /// ```http
    /// GET /livez HTTP/1.1
    /// ```
    ///
    /// For combined health checks:
    ///
    /// ```http
    /// GET /health HTTP/1.1
    /// ```
    fn map_health_endpoints(self) -> Self;
}

impl HealthRoutes for Router<AppState> {
    fn map_health_endpoints(self) -> Self {
        self.route("/health", health_endpoint(HealthCheck::Full))
            .route("/startupz", health_endpoint(HealthCheck::Startup))
            .route("/readyz", health_endpoint(HealthCheck::Readiness))
            .route("/livez", health_endpoint(HealthCheck::Liveness))
    }
}

fn health_endpoint(check: HealthCheck) -> MethodRouter<AppState> {
    get(move |state: State<AppState>| handle_health(state, check))
}

/// Performs a health check.
///
/// ```http
/// GET /health
/// ```
async fn handle_health(State(state): State<AppState>, check: HealthCheck) -> HealthState {
    match check {
        HealthCheck::Startup | HealthCheck::Liveness => HealthState::Healthy,
        HealthCheck::Readiness | HealthCheck::Full => state.registry.health().await,
    }
}

impl IntoResponse for HealthState {
    fn into_response(self) -> Response {
        let status = match self {
            HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
            HealthState::Failed => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}
