//! World session endpoints: enter, checkpoint, complete, abandon

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use cq_common::types::{HubState, SessionHandle, WorldProgress};

use super::error::ApiResult;
use super::middleware::device_id;
use crate::content::ContentDescriptor;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EnterResponse {
    pub world: WorldProgress,
    pub content: ContentDescriptor,
    /// Bundle payload for the client to boot the world from
    pub payload: Vec<u8>,
    pub reduced_fidelity: bool,
    /// True when play resumed from an abandoned slot (preserved blob restored)
    pub resumed: bool,
    pub lease_idle_seconds: i64,
}

/// POST /api/worlds/:index/enter
pub async fn enter_world(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    Path(index): Path<u8>,
    headers: HeaderMap,
) -> ApiResult<Json<EnterResponse>> {
    let device = device_id(&headers)?;
    let outcome = state.controller.enter(handle.session_id, index, device).await?;
    Ok(Json(EnterResponse {
        world: outcome.world,
        content: outcome.bundle.descriptor,
        payload: outcome.bundle.payload,
        reduced_fidelity: outcome.bundle.reduced_fidelity,
        resumed: outcome.resumed,
        lease_idle_seconds: outcome.lease_idle_seconds,
    }))
}

#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    pub stored_bytes: usize,
    pub raw_bytes: usize,
}

/// POST /api/worlds/:index/checkpoint
///
/// The body is the raw world state blob; compression happens server-side
/// before the blob touches storage.
pub async fn checkpoint_world(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    Path(index): Path<u8>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CheckpointResponse>> {
    let device = device_id(&headers)?;
    let outcome = state
        .controller
        .checkpoint(handle.session_id, index, device, &body)
        .await?;
    Ok(Json(CheckpointResponse {
        stored_bytes: outcome.stored_bytes,
        raw_bytes: outcome.raw_bytes,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub score: i64,
    #[serde(default)]
    pub achievement_flags: Vec<String>,
}

/// POST /api/worlds/:index/complete
///
/// Idempotent: a retried completion returns the unchanged hub state with
/// the same 200, so clients can retry on network failure without
/// double-counting.
pub async fn complete_world(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    Path(index): Path<u8>,
    headers: HeaderMap,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<Json<HubState>> {
    let device = device_id(&headers)?;
    let snapshot = state
        .controller
        .complete(
            handle.session_id,
            index,
            device,
            request.score,
            &request.achievement_flags,
        )
        .await?;
    Ok(Json(snapshot))
}

/// POST /api/worlds/:index/abandon
pub async fn abandon_world(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    Path(index): Path<u8>,
    headers: HeaderMap,
) -> ApiResult<Json<WorldProgress>> {
    let device = device_id(&headers)?;
    let world = state.controller.abandon(handle.session_id, index, device).await?;
    Ok(Json(world))
}
