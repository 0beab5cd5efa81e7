//! Contains the HTTP routes.

mod health;
mod metrics;
mod replay;

use crate::AppState;
use axum::Router;
pub use health::HealthRoutes;
pub use metrics::MetricsRoutes;
pub use replay::ReplayRoutes;

/// Builds the router serving all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .map_metrics_endpoint()
        .map_replay_endpoint()
        .map_health_endpoints()
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::backend_registry::BackendRegistry;
    use crate::AppState;
    use app_config::AppConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use tower::ServiceExt;
    use upload_pipeline::{ReplayCoordinator, Timeouts, UploadPipeline};

    pub async fn app_state() -> AppState {
        let config = AppConfig::default();
        let registry = BackendRegistry::from_config(&config).await.unwrap();
        let pipeline = UploadPipeline::new(
            &config,
            registry.pipeline_stores(&config).unwrap(),
            registry.pipeline_streams(),
        );
        let replayer = ReplayCoordinator::new(
            registry.streams().replay.clone(),
            pipeline.retry_publisher().clone(),
            config.replay.batch_size,
            Timeouts::from(&config.timeouts),
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        AppState {
            shutdown_tx,
            registry: Arc::new(registry),
            replayer: Arc::new(replayer),
        }
    }

    /// Sends `request` through the router and returns the status and body.
    pub async fn call(state: AppState, request: Request<Body>) -> (StatusCode, String) {
        let response = super::build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }
}
