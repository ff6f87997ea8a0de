//! Event types for the progression engine
//!
//! Events are broadcast via `EventBus` and serialized for SSE transmission to
//! connected devices. All engine components emit through this central enum.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::WorldStatus;

/// Engine event types
///
/// One enum for all components so subscribers can match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    /// A new session was created on first code issuance
    SessionCreated {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Hub totals changed (completion applied or sync merged)
    ///
    /// Other devices on the same session use this to refresh their hub view.
    HubUpdated {
        session_id: Uuid,
        total_score: i64,
        worlds_completed: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A world slot changed status (entered, abandoned, resumed, unlocked)
    WorldStatusChanged {
        session_id: Uuid,
        world_index: u8,
        status: WorldStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A world was completed and its score accepted into the hub
    WorldCompleted {
        session_id: Uuid,
        world_index: u8,
        score: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Achievements newly unlocked by the aggregator
    AchievementsUnlocked {
        session_id: Uuid,
        achievement_ids: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A sync batch was reconciled into the authoritative state
    ///
    /// `conflicts` counts deltas that lost a merge; surfaced as telemetry
    /// only, never as a user-facing failure.
    SyncMerged {
        session_id: Uuid,
        device_id: Uuid,
        applied: usize,
        conflicts: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The session was erased on a data-subject request
    SessionErased {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl HubEvent {
    /// Session this event belongs to, used for per-session SSE filtering
    pub fn session_id(&self) -> Uuid {
        match self {
            HubEvent::SessionCreated { session_id, .. }
            | HubEvent::HubUpdated { session_id, .. }
            | HubEvent::WorldStatusChanged { session_id, .. }
            | HubEvent::WorldCompleted { session_id, .. }
            | HubEvent::AchievementsUnlocked { session_id, .. }
            | HubEvent::SyncMerged { session_id, .. }
            | HubEvent::SessionErased { session_id, .. } => *session_id,
        }
    }

    /// Event name used as the SSE event field
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::SessionCreated { .. } => "session_created",
            HubEvent::HubUpdated { .. } => "hub_updated",
            HubEvent::WorldStatusChanged { .. } => "world_status_changed",
            HubEvent::WorldCompleted { .. } => "world_completed",
            HubEvent::AchievementsUnlocked { .. } => "achievements_unlocked",
            HubEvent::SyncMerged { .. } => "sync_merged",
            HubEvent::SessionErased { .. } => "session_erased",
        }
    }
}

/// Broadcast bus shared by engine components and the SSE bridge
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; silently dropped when no device is connected
    pub fn emit(&self, event: HubEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let session_id = Uuid::new_v4();
        bus.emit(HubEvent::HubUpdated {
            session_id,
            total_score: 90,
            worlds_completed: 1,
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), session_id);
        assert_eq!(event.name(), "hub_updated");
    }

    #[test]
    fn emit_without_subscribers_is_lossy_not_fatal() {
        let bus = EventBus::new(16);
        bus.emit(HubEvent::SessionCreated {
            session_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
