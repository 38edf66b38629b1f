use crate::AppState;
use crate::error::ApiError;
use crate::model::{CommunityId, Endpoint, ServerSnapshot};

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_macros::debug_handler;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub(crate) struct CommunityStatus {
    community_id: CommunityId,
    endpoint: Endpoint,
    online: bool,
    /// Latest poll, absent until the first one completes.
    snapshot: Option<ServerSnapshot>,
}

async fn community_status(state: &AppState, community_id: CommunityId, endpoint: Endpoint) -> CommunityStatus {
    let snapshot = state
        .snapshots
        .get(community_id)
        .await
        .map(|s| ServerSnapshot::clone(&s));
    CommunityStatus {
        community_id,
        endpoint,
        online: snapshot.as_ref().is_some_and(|s| s.is_online()),
        snapshot,
    }
}

#[debug_handler]
pub(crate) async fn status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let endpoints = state.settings.endpoints().await?;

    let mut statuses = Vec::with_capacity(endpoints.len());
    for (community_id, endpoint) in endpoints {
        statuses.push(community_status(&state, community_id, endpoint).await);
    }
    Ok(Json(statuses))
}

#[debug_handler]
pub(crate) async fn community(
    State(state): State<Arc<AppState>>,
    Path(community_id): Path<CommunityId>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = state
        .settings
        .endpoint(community_id)
        .await?
        .ok_or(ApiError::NotTracked(community_id))?;

    Ok(Json(community_status(&state, community_id, endpoint).await))
}
