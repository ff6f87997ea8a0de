//! Cross-device synchronizer
//!
//! Reconciles buffered deltas from devices sharing one access code. Merge
//! rules are commutative and idempotent so any arrival order converges on
//! the same authoritative state:
//!
//! - scalar fields (world status, state blob) merge last-writer-wins by
//!   (lamport clock, device id), so wall-clock skew between devices never
//!   affects the outcome
//! - achievement sets merge by union: once unlocked anywhere, unlocked
//!   everywhere
//! - conflicting completions of the same world keep the higher score,
//!   never a sum or an average
//!
//! Losing deltas are counted as conflicts for telemetry and logged; they are
//! never surfaced to a device as a failure.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use cq_common::events::HubEvent;
use cq_common::types::{
    check_world_index, AchievementScope, DeltaPayload, HubState, SyncDelta, WorldProgress,
    WorldStatus,
};
use cq_common::Result;

use crate::db::{achievements as achievements_db, deltas as deltas_db, progress, sessions};
use crate::hub::HubStateManager;

/// A delta as submitted by a device; session and device come from the request
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingDelta {
    pub lamport: u64,
    #[serde(flatten)]
    pub payload: DeltaPayload,
}

/// Reconciliation result returned to the submitting device
#[derive(Debug)]
pub struct MergeOutcome {
    pub state: HubState,
    /// Deltas that won their merge
    pub applied: usize,
    /// Deltas that lost (telemetry only, auto-resolved)
    pub conflicts: usize,
    /// Merged logical clock; the device adopts max(local, this) + 1
    pub clock: u64,
}

/// Last-writer-wins ordering: lamport first, device id as the deterministic
/// tiebreak. A field never written yet (no device recorded) always loses.
fn writer_wins(incoming: (u64, Uuid), current: (u64, Option<Uuid>)) -> bool {
    let current_device = current.1.map(|d| d.as_u128()).unwrap_or(0);
    (incoming.0, incoming.1.as_u128()) > (current.0, current_device)
}

pub struct Synchronizer {
    hub: Arc<HubStateManager>,
}

impl Synchronizer {
    pub fn new(hub: Arc<HubStateManager>) -> Self {
        Self { hub }
    }

    /// Merge a device's buffered deltas into the authoritative session.
    ///
    /// Every delta is appended to the audit log before application and
    /// marked applied afterwards. After the merge the recomputed state is
    /// broadcast, so all connected devices converge within one round-trip.
    pub async fn merge(
        &self,
        session_id: Uuid,
        device_id: Uuid,
        mut incoming: Vec<IncomingDelta>,
    ) -> Result<MergeOutcome> {
        let lock = self.hub.session_lock(session_id);
        let _guard = lock.lock().await;

        let pool = self.hub.pool();
        let session = sessions::load_required(pool, session_id).await?;

        let mut log_ids = Vec::with_capacity(incoming.len());
        for delta in &incoming {
            check_world_index(delta.payload.world_index())?;
            let id = deltas_db::append(
                pool,
                &SyncDelta {
                    device_id,
                    session_id,
                    lamport: delta.lamport,
                    payload: delta.payload.clone(),
                },
            )
            .await?;
            log_ids.push(id);
        }

        // A device's own lamports are monotonic, so a stable sort preserves
        // its emission order while interleaving deterministically with
        // whatever other devices already merged
        incoming.sort_by_key(|d| d.lamport);

        let mut clock = session.clock;
        let mut applied = 0usize;
        let mut conflicts = 0usize;

        for delta in &incoming {
            clock = clock.max(delta.lamport);
            let world_index = delta.payload.world_index();
            let world = progress::load_world(pool, session_id, world_index).await?;

            let won = match &delta.payload {
                DeltaPayload::Checkpoint { state_blob, .. } => {
                    self.merge_checkpoint(session_id, &world, delta.lamport, device_id, state_blob)
                        .await?
                }
                DeltaPayload::StatusChange { status, .. } => {
                    self.merge_status(session_id, &world, delta.lamport, device_id, *status)
                        .await?
                }
                DeltaPayload::Completion {
                    score,
                    achievement_flags,
                    ..
                } => {
                    self.merge_completion(
                        session_id,
                        &world,
                        delta.lamport,
                        device_id,
                        *score,
                        achievement_flags,
                    )
                    .await?
                }
            };

            if won {
                applied += 1;
            } else {
                conflicts += 1;
                warn!(
                    session_id = %session_id,
                    device_id = %device_id,
                    world_index,
                    lamport = delta.lamport,
                    "Sync delta lost its merge (auto-resolved)"
                );
            }
        }

        // Lamport receive rule: advance past everything merged so far
        clock += 1;
        let state = self.hub.finalize(session_id, clock, Some(device_id)).await?;
        deltas_db::mark_applied(pool, &log_ids).await?;
        sessions::touch(pool, session_id, self.hub.config().retention()).await?;

        self.hub.bus().emit(HubEvent::SyncMerged {
            session_id,
            device_id,
            applied,
            conflicts,
            timestamp: Utc::now(),
        });
        debug!(session_id = %session_id, applied, conflicts, clock, "Sync batch merged");

        Ok(MergeOutcome {
            state,
            applied,
            conflicts,
            clock,
        })
    }

    /// Blob writes: pure last-writer-wins. A late checkpoint from an evicted
    /// lease holder lands here and loses to any newer writer.
    async fn merge_checkpoint(
        &self,
        session_id: Uuid,
        world: &WorldProgress,
        lamport: u64,
        device_id: Uuid,
        blob: &[u8],
    ) -> Result<bool> {
        if world.status == WorldStatus::Completed {
            // Completion is terminal; a trailing checkpoint has nothing to add
            return Ok(false);
        }
        if !writer_wins((lamport, device_id), (world.blob_lamport, world.blob_device)) {
            return Ok(false);
        }
        progress::save_blob(
            self.hub.pool(),
            session_id,
            world.world_index,
            blob,
            lamport,
            Some(device_id),
        )
        .await?;
        Ok(true)
    }

    /// Status moves merge by rank (monotonic forward), with last-writer-wins
    /// breaking ties between same-rank states (in-progress vs abandoned)
    async fn merge_status(
        &self,
        session_id: Uuid,
        world: &WorldProgress,
        lamport: u64,
        device_id: Uuid,
        status: WorldStatus,
    ) -> Result<bool> {
        if status == WorldStatus::Completed {
            // Completion must carry a score; it travels as a Completion delta
            return Ok(false);
        }

        let advances = status.rank() > world.status.rank();
        let same_rank_newer = status.rank() == world.status.rank()
            && status != world.status
            && writer_wins((lamport, device_id), (world.status_lamport, world.status_device));

        if !(advances || same_rank_newer) {
            // An echo of the current status is a harmless no-op, not a conflict
            return Ok(status == world.status);
        }

        progress::update_status(
            self.hub.pool(),
            session_id,
            world.world_index,
            status,
            lamport,
            Some(device_id),
        )
        .await?;
        Ok(true)
    }

    /// Completions: the first one lands; a second completion of the same
    /// world keeps the higher score, regardless of arrival order. The
    /// per-world achievement flags union in either way.
    async fn merge_completion(
        &self,
        session_id: Uuid,
        world: &WorldProgress,
        lamport: u64,
        device_id: Uuid,
        score: i64,
        achievement_flags: &[String],
    ) -> Result<bool> {
        if score < 0 {
            return Ok(false);
        }

        if !achievement_flags.is_empty() {
            let flags = achievement_flags.iter().cloned().collect();
            achievements_db::unlock(
                self.hub.pool(),
                session_id,
                &flags,
                AchievementScope::SingleWorld,
            )
            .await?;
        }

        match (world.status, world.score) {
            (WorldStatus::Completed, Some(existing)) if score > existing => {
                progress::replace_score(self.hub.pool(), session_id, world.world_index, score)
                    .await?;
                Ok(true)
            }
            (WorldStatus::Completed, _) => Ok(false),
            _ => {
                progress::record_completion(
                    self.hub.pool(),
                    session_id,
                    world.world_index,
                    score,
                    lamport,
                    Some(device_id),
                )
                .await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StaticContentProvider;
    use cq_common::config::EngineConfig;
    use cq_common::db::connect_memory;
    use cq_common::events::EventBus;
    use cq_common::types::CulturalContext;

    async fn synchronizer() -> (Synchronizer, Arc<HubStateManager>, Uuid) {
        let pool = connect_memory().await.unwrap();
        let session = sessions::create_session(
            &pool,
            &cq_common::codes::hash_code("AB3DFJ9Q"),
            &CulturalContext::default(),
            chrono::Duration::days(30),
        )
        .await
        .unwrap();
        let hub = Arc::new(HubStateManager::new(
            pool,
            EngineConfig::default(),
            EventBus::new(64),
            Arc::new(StaticContentProvider::default()),
        ));
        (Synchronizer::new(hub.clone()), hub, session.session_id)
    }

    fn completion(lamport: u64, world: u8, score: i64) -> IncomingDelta {
        IncomingDelta {
            lamport,
            payload: DeltaPayload::Completion {
                world_index: world,
                score,
                achievement_flags: Vec::new(),
            },
        }
    }

    fn checkpoint(lamport: u64, world: u8, blob: &[u8]) -> IncomingDelta {
        IncomingDelta {
            lamport,
            payload: DeltaPayload::Checkpoint {
                world_index: world,
                state_blob: blob.to_vec(),
            },
        }
    }

    fn status(lamport: u64, world: u8, status: WorldStatus) -> IncomingDelta {
        IncomingDelta {
            lamport,
            payload: DeltaPayload::StatusChange {
                world_index: world,
                status,
            },
        }
    }

    #[tokio::test]
    async fn conflicting_completions_keep_the_higher_score() {
        let (sync, hub, session_id) = synchronizer().await;
        let tablet = Uuid::new_v4();
        let desktop = Uuid::new_v4();

        // Two devices completed world 1 offline with different scores; the
        // merged result is 85, not 70 and not 155
        let a = sync
            .merge(session_id, tablet, vec![completion(1, 1, 70)])
            .await
            .unwrap();
        assert_eq!(a.applied, 1);

        let b = sync
            .merge(session_id, desktop, vec![completion(1, 1, 85)])
            .await
            .unwrap();
        assert_eq!(b.applied, 1);
        assert_eq!(b.conflicts, 0);
        assert_eq!(b.state.worlds[0].score, Some(85));
        assert_eq!(b.state.session.total_score, 85);

        // Replaying the lower score in the other order changes nothing
        let c = sync
            .merge(session_id, tablet, vec![completion(2, 1, 70)])
            .await
            .unwrap();
        assert_eq!(c.conflicts, 1);
        assert_eq!(c.state.worlds[0].score, Some(85));
        assert_eq!(hub.load(session_id).await.unwrap().session.total_score, 85);
    }

    #[tokio::test]
    async fn merge_order_does_not_change_the_outcome() {
        let (sync, _hub, session_id) = synchronizer().await;
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        let deltas_low = vec![
            status(1, 1, WorldStatus::InProgress),
            checkpoint(2, 1, b"low-device-state"),
        ];
        let deltas_high = vec![
            status(1, 1, WorldStatus::InProgress),
            checkpoint(2, 1, b"high-device-state"),
        ];

        sync.merge(session_id, low, deltas_low).await.unwrap();
        let out = sync.merge(session_id, high, deltas_high).await.unwrap();

        // Equal lamports: the device id tiebreak decides, and the higher
        // device id wins whichever batch arrived first
        assert_eq!(
            out.state.worlds[0].state_blob.as_deref(),
            Some(b"high-device-state".as_ref())
        );
    }

    #[tokio::test]
    async fn stale_checkpoint_from_evicted_device_is_a_conflict() {
        let (sync, _hub, session_id) = synchronizer().await;
        let evicted = Uuid::from_u128(1);
        let holder = Uuid::from_u128(2);

        sync.merge(
            session_id,
            holder,
            vec![
                status(5, 1, WorldStatus::InProgress),
                checkpoint(6, 1, b"current"),
            ],
        )
        .await
        .unwrap();

        // The evicted device flushes a buffer written before the takeover
        let out = sync
            .merge(session_id, evicted, vec![checkpoint(3, 1, b"stale")])
            .await
            .unwrap();
        assert_eq!(out.applied, 0);
        assert_eq!(out.conflicts, 1);
        assert_eq!(out.state.worlds[0].state_blob.as_deref(), Some(b"current".as_ref()));
    }

    #[tokio::test]
    async fn checkpoint_after_completion_is_discarded() {
        let (sync, _hub, session_id) = synchronizer().await;
        let device = Uuid::new_v4();

        sync.merge(session_id, device, vec![completion(1, 1, 90)])
            .await
            .unwrap();
        let out = sync
            .merge(session_id, device, vec![checkpoint(99, 1, b"late")])
            .await
            .unwrap();
        assert_eq!(out.conflicts, 1);
        assert_eq!(out.state.worlds[0].status, WorldStatus::Completed);
        assert!(out.state.worlds[0].state_blob.is_none());
    }

    #[tokio::test]
    async fn status_regression_is_rejected_but_echo_is_not_a_conflict() {
        let (sync, _hub, session_id) = synchronizer().await;
        let device = Uuid::new_v4();

        sync.merge(session_id, device, vec![status(1, 1, WorldStatus::InProgress)])
            .await
            .unwrap();

        // Unlocked would be a rank regression; in-progress again is an echo
        let out = sync
            .merge(
                session_id,
                device,
                vec![
                    status(2, 1, WorldStatus::Unlocked),
                    status(3, 1, WorldStatus::InProgress),
                ],
            )
            .await
            .unwrap();
        assert_eq!(out.conflicts, 1);
        assert_eq!(out.applied, 1);
        assert_eq!(out.state.worlds[0].status, WorldStatus::InProgress);
    }

    #[tokio::test]
    async fn achievement_flags_union_even_when_the_completion_loses() {
        let (sync, _hub, session_id) = synchronizer().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        sync.merge(session_id, first, vec![completion(1, 1, 95)])
            .await
            .unwrap();

        let losing = IncomingDelta {
            lamport: 2,
            payload: DeltaPayload::Completion {
                world_index: 1,
                score: 50,
                achievement_flags: vec!["world1-no-hints".to_string()],
            },
        };
        let out = sync.merge(session_id, second, vec![losing]).await.unwrap();
        assert_eq!(out.conflicts, 1);
        assert_eq!(out.state.worlds[0].score, Some(95));
        assert!(out.state.achievements.contains(&"world1-no-hints".to_string()));
    }

    #[tokio::test]
    async fn offline_completions_unlock_and_feed_meta_achievements() {
        let (sync, _hub, session_id) = synchronizer().await;
        let device = Uuid::new_v4();

        let out = sync
            .merge(
                session_id,
                device,
                vec![completion(1, 1, 92), completion(2, 2, 88)],
            )
            .await
            .unwrap();

        assert_eq!(out.state.session.worlds_completed, 2);
        assert_eq!(out.state.session.total_score, 180);
        // World 3 unlocks because world 2 cleared its threshold
        assert_eq!(out.state.worlds[2].status, WorldStatus::Unlocked);
        assert!(out.state.achievements.contains(&"first-steps".to_string()));
        assert!(out.clock > 2);
    }

    #[tokio::test]
    async fn merged_deltas_are_marked_applied() {
        let (sync, hub, session_id) = synchronizer().await;
        let device = Uuid::new_v4();

        sync.merge(session_id, device, vec![completion(1, 1, 80)])
            .await
            .unwrap();
        let pending = deltas_db::pending_count(hub.pool(), session_id).await.unwrap();
        assert_eq!(pending, 0);
    }
}
