//! Access-code authentication middleware
//!
//! Protected routes carry the access code in the `X-Access-Code` header.
//! The middleware validates it (hashing before lookup) and inserts the
//! resulting `SessionHandle` as a request extension, so handlers never see
//! the cleartext code.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use cq_common::types::SessionHandle;
use cq_common::Error;

use super::error::ApiError;
use crate::AppState;

pub const ACCESS_CODE_HEADER: &str = "x-access-code";
pub const DEVICE_ID_HEADER: &str = "x-device-id";

pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let code = request
        .headers()
        .get(ACCESS_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::InvalidCode)?;

    let handle: SessionHandle = state.auth.validate(code).await?;
    request.extensions_mut().insert(handle);
    Ok(next.run(request).await)
}

/// Parse the caller's device id header; required on routes that write
/// world state (lease identity and merge provenance both need it)
pub fn device_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::InvalidInput("Missing X-Device-Id header".to_string()))?;
    let id = Uuid::parse_str(raw)
        .map_err(|_| Error::InvalidInput(format!("Malformed device id {:?}", raw)))?;
    Ok(id)
}
