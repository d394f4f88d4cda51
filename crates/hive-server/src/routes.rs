use axum::extract::{FromRequest, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use hive_core::VersionVector;
use hive_election::{HeartbeatRequest, RequestVoteRequest};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

impl<T> IntoResponse for AppJson<T>
where
    axum::Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cluster/v1/status", get(status))
        .route("/cluster/v1/election/request-vote", post(request_vote))
        .route("/cluster/v1/election/heartbeat", post(heartbeat))
        .route("/cluster/v1/events/delta", post(events_delta))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    AppJson(state.election.get_status().await)
}

async fn request_vote(
    State(state): State<AppState>,
    AppJson(req): AppJson<RequestVoteRequest>,
) -> impl IntoResponse {
    AppJson(state.election.handle_request_vote(req).await)
}

async fn heartbeat(
    State(state): State<AppState>,
    AppJson(req): AppJson<HeartbeatRequest>,
) -> impl IntoResponse {
    AppJson(state.election.handle_heartbeat(req).await)
}

/// Defensive input shape for `/events/delta`: the version vector arrives as
/// an arbitrary JSON object so malformed entries (non-numeric, negative,
/// non-finite) can be dropped instead of rejecting the whole request.
#[derive(Debug, Deserialize)]
struct DeltaRequestBody {
    #[serde(default)]
    version_vector: serde_json::Map<String, serde_json::Value>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DeltaResponseBody {
    events: Vec<hive_core::ClusterEvent>,
    version_vector: VersionVector,
}

async fn events_delta(
    State(state): State<AppState>,
    AppJson(body): AppJson<DeltaRequestBody>,
) -> impl IntoResponse {
    let remote_vector = VersionVector::from_json_map(&body.version_vector);
    let limit = body.limit.unwrap_or(hive_replication::DEFAULT_DELTA_LIMIT);
    let (events, version_vector) = state.cache.delta_since(&remote_vector, limit);
    AppJson(DeltaResponseBody { events, version_vector })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive_election::{Election, ElectionConfig};

    use super::*;
    use crate::cache::DeltaCache;

    fn test_state() -> AppState {
        AppState {
            election: Arc::new(Election::disabled(ElectionConfig::default())),
            cache: DeltaCache::new(),
            auth_token: None,
        }
    }

    #[tokio::test]
    async fn status_reports_disabled_election_as_leader() {
        let response = status(State(test_state())).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
