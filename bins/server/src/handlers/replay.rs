//! Contains the `/replay` endpoint.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use upload_pipeline::{log_error_chain, ReplaySummary};

pub trait ReplayRoutes {
    /// Moves parked events back to the retry stream.
    ///
    /// ```http
    /// POST /replay HTTP/1.1
    /// ```
    ///
    /// Answers `409 Conflict` while another pass is running.
    ///
    /// Events enqueued after an optional cutoff stay parked:
    ///
    /// ```http
    /// POST /replay?until=2024-01-02T00:00:00Z HTTP/1.1
    /// ```
    fn map_replay_endpoint(self) -> Self;
}

impl ReplayRoutes for Router<AppState> {
    fn map_replay_endpoint(self) -> Self {
        self.route("/replay", post(replay))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReplayParams {
    until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ReplayResponse {
    replayed: usize,
    dropped: usize,
    reached_cutoff: bool,
}

impl From<ReplaySummary> for ReplayResponse {
    fn from(value: ReplaySummary) -> Self {
        Self {
            replayed: value.replayed,
            dropped: value.dropped,
            reached_cutoff: value.reached_cutoff,
        }
    }
}

async fn replay(State(state): State<AppState>, Query(params): Query<ReplayParams>) -> Response {
    let cutoff = params.until.unwrap_or_else(Utc::now);
    info!("Replay requested for events enqueued until {cutoff}");

    match state.replayer.try_replay_until(cutoff).await {
        Ok(Some(summary)) => Json(ReplayResponse::from(summary)).into_response(),
        Ok(None) => {
            warn!("Refusing replay request while another pass is running");
            (StatusCode::CONFLICT, "A replay pass is already running").into_response()
        }
        Err(e) => {
            error!("Replay failed");
            log_error_chain(&e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.describe()).into_response()
        }
    }
}
