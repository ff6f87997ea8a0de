//! Cross-device sync endpoint

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use cq_common::types::{HubState, SessionHandle};

use super::error::ApiResult;
use super::middleware::device_id;
use crate::sync::IncomingDelta;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub deltas: Vec<IncomingDelta>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub applied: usize,
    pub conflicts: usize,
    /// Merged logical clock; the device adopts max(local, this) + 1
    pub clock: u64,
    pub state: HubState,
}

/// POST /api/sync
///
/// Accepts a device's buffered deltas, merges them deterministically, and
/// returns the authoritative state. Conflicts are counts, never errors.
pub async fn merge_deltas(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncResponse>> {
    let device = device_id(&headers)?;
    let outcome = state
        .sync
        .merge(handle.session_id, device, request.deltas)
        .await?;
    Ok(Json(SyncResponse {
        applied: outcome.applied,
        conflicts: outcome.conflicts,
        clock: outcome.clock,
        state: outcome.state,
    }))
}
