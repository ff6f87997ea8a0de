//! Server-Sent Events stream
//!
//! Bridges the in-process event bus to connected browsers. Each connection
//! is scoped to one session: a device only ever sees events for the access
//! code it authenticated with, so one shared broadcast channel serves every
//! connection without leaking progress between sessions.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use cq_common::events::EventBus;

/// Build a session-scoped SSE response from the shared event bus.
///
/// Slow consumers that lag behind the channel capacity drop the missed
/// events and keep streaming; the next hub snapshot resynchronizes them.
pub fn session_stream(
    bus: &EventBus,
    session_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session_id = %session_id, "New SSE client connected");

    let rx = bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) => {
                if event.session_id() != session_id {
                    return None;
                }
                match serde_json::to_string(&event) {
                    Ok(json) => Some(Ok(Event::default().event(event.name()).data(json))),
                    Err(e) => {
                        warn!("Failed to serialize event: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                // Lagged or closed; keep the connection alive
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cq_common::events::HubEvent;

    #[tokio::test]
    async fn stream_filters_to_the_subscribed_session() {
        let bus = EventBus::new(16);
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();

        let rx = bus.subscribe();
        let mut stream = BroadcastStream::new(rx);

        bus.emit(HubEvent::HubUpdated {
            session_id: other,
            total_score: 10,
            worlds_completed: 1,
            timestamp: Utc::now(),
        });
        bus.emit(HubEvent::HubUpdated {
            session_id: mine,
            total_score: 90,
            worlds_completed: 1,
            timestamp: Utc::now(),
        });

        let mut seen = Vec::new();
        while let Ok(Some(Ok(event))) =
            tokio::time::timeout(Duration::from_millis(50), stream.next()).await
        {
            if event.session_id() == mine {
                seen.push(event);
            }
        }
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name(), "hub_updated");
    }
}
