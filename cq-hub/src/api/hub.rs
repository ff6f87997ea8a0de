//! Hub snapshot endpoint

use axum::extract::State;
use axum::{Extension, Json};

use cq_common::types::{HubState, SessionHandle};

use super::error::ApiResult;
use crate::AppState;

/// GET /api/hub
///
/// Aggregated session state: totals, the five world slots, achievements.
/// Read-only; the snapshot is always served from authoritative storage.
pub async fn hub_snapshot(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
) -> ApiResult<Json<HubState>> {
    let snapshot = state.hub.load(handle.session_id).await?;
    Ok(Json(snapshot))
}
