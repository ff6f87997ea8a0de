//! SSE event stream endpoint

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;

use super::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    pub code: String,
}

/// GET /api/events?code=XXXXXXXX
///
/// The browser EventSource API cannot set custom headers, so this endpoint
/// takes the access code as a query parameter instead of `X-Access-Code`.
/// Validation is identical; the stream is scoped to the resolved session.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let handle = state.auth.validate(&query.code).await?;
    Ok(crate::sse::session_stream(&state.bus, handle.session_id))
}
