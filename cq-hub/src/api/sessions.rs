//! Session issuance and validation endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use cq_common::types::{CulturalContext, HubState};

use super::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub cultural_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// Cleartext access code; returned exactly once, never stored
    pub access_code: String,
    pub session_id: uuid::Uuid,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub state: HubState,
}

/// POST /api/session
///
/// Issues a fresh access code and its session. No body fields are required;
/// an optional cultural context selects the content variant set.
pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let context = request
        .cultural_context
        .map(CulturalContext::new)
        .unwrap_or_default();

    let (code, session) = state.auth.issue(&context).await?;
    let snapshot = state.hub.load(session.session_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            access_code: code,
            session_id: session.session_id,
            expires_at: session.expires_at,
            state: snapshot,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

/// POST /api/session/validate
///
/// Entry-point code check: validates the entered code and returns the full
/// hub snapshot in one round-trip, so the hub screen renders from a single
/// request.
pub async fn validate_session(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<HubState>> {
    let handle = state.auth.validate(&request.code).await?;
    let snapshot = state.hub.load(handle.session_id).await?;
    Ok(Json(snapshot))
}
