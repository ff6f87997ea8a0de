//! Data-subject rights: export and erasure
//!
//! Both operate on the session resolved from the access code; no other
//! identifier exists, so the code is the sole proof of ownership.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use cq_common::events::HubEvent;
use cq_common::types::{HubSession, SessionHandle, UnlockedAchievement, WorldProgress};

use super::error::ApiResult;
use crate::db::deltas::DeltaLogEntry;
use crate::db::{achievements, deltas, progress, sessions};
use crate::AppState;

/// Machine-readable dump of everything stored for one session
#[derive(Debug, Serialize)]
pub struct DataExport {
    pub exported_at: chrono::DateTime<chrono::Utc>,
    pub session: HubSession,
    pub worlds: Vec<WorldProgress>,
    pub achievements: Vec<UnlockedAchievement>,
    pub sync_log: Vec<DeltaLogEntry>,
}

/// GET /api/data/export
///
/// Right of access: every stored record for the session, decoded. The code
/// hash never appears in the export (it is derived from the code the caller
/// just presented, not personal data worth echoing back).
pub async fn export_data(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
) -> ApiResult<Json<DataExport>> {
    let pool = state.hub.pool();
    let session = sessions::load_required(pool, handle.session_id).await?;
    let worlds = progress::load_worlds(pool, handle.session_id).await?;
    let achievements = achievements::export(pool, handle.session_id).await?;
    let sync_log = deltas::export_log(pool, handle.session_id).await?;

    info!(session_id = %handle.session_id, "Data export served");
    Ok(Json(DataExport {
        exported_at: Utc::now(),
        session,
        worlds,
        achievements,
        sync_log,
    }))
}

#[derive(Debug, Serialize)]
pub struct EraseResponse {
    pub erased: bool,
}

/// DELETE /api/data
///
/// Right to erasure: cascading delete of the session row and every child
/// record. Unrecoverable; the access code dies with it.
pub async fn erase_data(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
) -> ApiResult<Json<EraseResponse>> {
    let lock = state.hub.session_lock(handle.session_id);
    let guard = lock.lock().await;

    let erased = sessions::erase_session(state.hub.pool(), handle.session_id).await?;
    drop(guard);
    state.hub.forget_session(handle.session_id);

    if erased {
        info!(session_id = %handle.session_id, "Session erased on request");
        state.bus.emit(HubEvent::SessionErased {
            session_id: handle.session_id,
            timestamp: Utc::now(),
        });
    }
    Ok(Json(EraseResponse { erased }))
}
