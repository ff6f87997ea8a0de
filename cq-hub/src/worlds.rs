//! World session controller
//!
//! Manages entry into and exit from an individual world: unlock checks, the
//! per-slot device lease, interim checkpoints, completion handoff to the hub
//! manager, and the degraded content-load fallback.
//!
//! Per-slot state machine: `locked → unlocked → in_progress → completed`,
//! with `abandoned` reachable only from `in_progress` and resumable back to
//! it. A completed world never re-enters play.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use cq_common::compress::compress_blob;
use cq_common::events::HubEvent;
use cq_common::types::{check_world_index, WorldProgress, WorldStatus};
use cq_common::{Error, HubState, Result};

use crate::content::{load_with_ceiling, ContentBundle};
use crate::db::{leases, progress, sessions};
use crate::hub::HubStateManager;

/// Result of entering a world: the slot, its content, and the lease terms
#[derive(Debug)]
pub struct EnterOutcome {
    pub world: WorldProgress,
    pub bundle: ContentBundle,
    /// True when play resumed from an abandoned slot (blob preserved)
    pub resumed: bool,
    pub lease_idle_seconds: i64,
}

/// Result of a checkpoint write
#[derive(Debug)]
pub struct CheckpointOutcome {
    pub stored_bytes: usize,
    pub raw_bytes: usize,
}

pub struct WorldSessionController {
    hub: Arc<HubStateManager>,
}

impl WorldSessionController {
    pub fn new(hub: Arc<HubStateManager>) -> Self {
        Self { hub }
    }

    /// Enter a world for play on one device.
    ///
    /// Fails with `WorldLocked` when the unlock rule is unmet and
    /// `WorldAlreadyActive` when another device holds a live lease. Content
    /// loading runs under the wall-clock ceiling with reduced-fidelity
    /// fallback, so a throttled network degrades rather than fails.
    pub async fn enter(&self, session_id: Uuid, world_index: u8, device_id: Uuid) -> Result<EnterOutcome> {
        check_world_index(world_index)?;
        let lock = self.hub.session_lock(session_id);
        let _guard = lock.lock().await;

        let pool = self.hub.pool();
        let config = self.hub.config();
        let state = sessions::load_state(pool, session_id).await?;
        let world = state.world(world_index)?;

        match world.status {
            WorldStatus::Locked => return Err(Error::WorldLocked(world_index)),
            WorldStatus::Completed => {
                return Err(Error::InvalidInput(format!(
                    "World {} is already completed",
                    world_index
                )))
            }
            WorldStatus::Unlocked | WorldStatus::InProgress | WorldStatus::Abandoned => {}
        }

        leases::acquire(pool, session_id, world_index, device_id, config.lease_idle()).await?;

        let resumed = world.status == WorldStatus::Abandoned;
        let clock = state.session.clock + 1;
        if world.status != WorldStatus::InProgress {
            progress::update_status(
                pool,
                session_id,
                world_index,
                WorldStatus::InProgress,
                clock,
                Some(device_id),
            )
            .await?;
            sessions::bump_clock(pool, session_id, clock).await?;
            self.hub.bus().emit(HubEvent::WorldStatusChanged {
                session_id,
                world_index,
                status: WorldStatus::InProgress,
                timestamp: Utc::now(),
            });
        }

        let bundle = load_with_ceiling(
            self.hub.provider().as_ref(),
            config,
            world_index,
            &state.session.cultural_context,
        )
        .await?;

        sessions::touch(pool, session_id, config.retention()).await?;

        let world = progress::load_world(pool, session_id, world_index).await?;
        info!(
            session_id = %session_id,
            world_index,
            device_id = %device_id,
            resumed,
            degraded = bundle.reduced_fidelity,
            "World entered"
        );

        Ok(EnterOutcome {
            world,
            bundle,
            resumed,
            lease_idle_seconds: config.lease_idle_seconds,
        })
    }

    /// Persist interim progress without finalizing a score.
    ///
    /// Renews the lease; a device whose lease lapsed and was taken over gets
    /// `WorldAlreadyActive` and must route its state through sync instead.
    pub async fn checkpoint(
        &self,
        session_id: Uuid,
        world_index: u8,
        device_id: Uuid,
        state_blob: &[u8],
    ) -> Result<CheckpointOutcome> {
        check_world_index(world_index)?;
        let lock = self.hub.session_lock(session_id);
        let _guard = lock.lock().await;

        let pool = self.hub.pool();
        let config = self.hub.config();

        let world = progress::load_world(pool, session_id, world_index).await?;
        if world.status != WorldStatus::InProgress {
            return Err(Error::InvalidInput(format!(
                "Cannot checkpoint world {} in status {}",
                world_index,
                world.status.as_str()
            )));
        }

        leases::renew(pool, session_id, world_index, device_id).await?;

        let session = sessions::load_required(pool, session_id).await?;
        let clock = session.clock + 1;
        let compressed = compress_blob(state_blob)?;
        let stored_bytes = compressed.len();

        crate::db::retry::retry_commit("checkpoint blob", config.commit_retry_ceiling_ms, || {
            progress::save_blob(pool, session_id, world_index, &compressed, clock, Some(device_id))
        })
        .await?;
        sessions::bump_clock(pool, session_id, clock).await?;
        sessions::touch(pool, session_id, config.retention()).await?;

        Ok(CheckpointOutcome {
            stored_bytes,
            raw_bytes: state_blob.len(),
        })
    }

    /// Finalize the world with its score and hand off to the hub manager
    pub async fn complete(
        &self,
        session_id: Uuid,
        world_index: u8,
        device_id: Uuid,
        final_score: i64,
        achievement_flags: &[String],
    ) -> Result<HubState> {
        check_world_index(world_index)?;
        let lock = self.hub.session_lock(session_id);
        let _guard = lock.lock().await;

        let pool = self.hub.pool();

        // A world already completed by a faster retry stays idempotent: skip
        // the lease check (it was released) and let the hub manager return
        // the unchanged state
        let world = progress::load_world(pool, session_id, world_index).await?;
        if world.status != WorldStatus::Completed {
            leases::renew(pool, session_id, world_index, device_id).await?;
            leases::release(pool, session_id, world_index, device_id).await?;
        }

        let state = self
            .hub
            .apply_world_completion(session_id, world_index, final_score, achievement_flags, Some(device_id))
            .await?;
        sessions::touch(pool, session_id, self.hub.config().retention()).await?;
        Ok(state)
    }

    /// Exit without completing: `in_progress → abandoned`, blob preserved
    pub async fn abandon(&self, session_id: Uuid, world_index: u8, device_id: Uuid) -> Result<WorldProgress> {
        check_world_index(world_index)?;
        let lock = self.hub.session_lock(session_id);
        let _guard = lock.lock().await;

        let pool = self.hub.pool();
        let world = progress::load_world(pool, session_id, world_index).await?;
        if world.status != WorldStatus::InProgress {
            return Err(Error::InvalidInput(format!(
                "Cannot abandon world {} in status {}",
                world_index,
                world.status.as_str()
            )));
        }

        leases::renew(pool, session_id, world_index, device_id).await?;

        let session = sessions::load_required(pool, session_id).await?;
        let clock = session.clock + 1;
        progress::update_status(
            pool,
            session_id,
            world_index,
            WorldStatus::Abandoned,
            clock,
            Some(device_id),
        )
        .await?;
        sessions::bump_clock(pool, session_id, clock).await?;
        leases::release(pool, session_id, world_index, device_id).await?;

        self.hub.bus().emit(HubEvent::WorldStatusChanged {
            session_id,
            world_index,
            status: WorldStatus::Abandoned,
            timestamp: Utc::now(),
        });
        info!(session_id = %session_id, world_index, "World abandoned");

        progress::load_world(pool, session_id, world_index).await
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

    async fn controller() -> (WorldSessionController, Uuid) {
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
        (WorldSessionController::new(hub), session.session_id)
    }

    #[tokio::test]
    async fn happy_path_enter_checkpoint_complete() {
        let (controller, session_id) = controller().await;
        let device = Uuid::new_v4();

        let entered = controller.enter(session_id, 1, device).await.unwrap();
        assert_eq!(entered.world.status, WorldStatus::InProgress);
        assert!(!entered.resumed);
        assert!(!entered.bundle.reduced_fidelity);

        let outcome = controller
            .checkpoint(session_id, 1, device, br#"{"scene":3,"answers":[1,2,1]}"#)
            .await
            .unwrap();
        assert!(outcome.stored_bytes > 0);

        let state = controller.complete(session_id, 1, device, 90, &[]).await.unwrap();
        assert_eq!(state.session.total_score, 90);
        assert_eq!(state.worlds[1].status, WorldStatus::Unlocked);
    }

    #[tokio::test]
    async fn locked_world_refuses_entry() {
        let (controller, session_id) = controller().await;
        let err = controller.enter(session_id, 2, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::WorldLocked(2)));
    }

    #[tokio::test]
    async fn second_device_gets_world_already_active() {
        let (controller, session_id) = controller().await;
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();

        controller.enter(session_id, 1, device_a).await.unwrap();
        let err = controller.enter(session_id, 1, device_b).await.unwrap_err();
        assert!(matches!(err, Error::WorldAlreadyActive(1)));
    }

    #[tokio::test]
    async fn abandon_preserves_blob_and_allows_resume() {
        let (controller, session_id) = controller().await;
        let device = Uuid::new_v4();

        controller.enter(session_id, 1, device).await.unwrap();
        controller
            .checkpoint(session_id, 1, device, br#"{"scene":7}"#)
            .await
            .unwrap();

        let abandoned = controller.abandon(session_id, 1, device).await.unwrap();
        assert_eq!(abandoned.status, WorldStatus::Abandoned);
        assert!(abandoned.state_blob.is_some());

        // Another device resumes; the blob is still there
        let other = Uuid::new_v4();
        let resumed = controller.enter(session_id, 1, other).await.unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.world.status, WorldStatus::InProgress);
        assert!(resumed.world.state_blob.is_some());
    }

    #[tokio::test]
    async fn abandoned_world_cannot_complete_without_reentering() {
        let (controller, session_id) = controller().await;
        let device = Uuid::new_v4();

        controller.enter(session_id, 1, device).await.unwrap();
        controller.abandon(session_id, 1, device).await.unwrap();

        let err = controller.complete(session_id, 1, device, 80, &[]).await.unwrap_err();
        assert!(matches!(err, Error::WorldAlreadyActive(1) | Error::InvalidInput(_)));

        controller.enter(session_id, 1, device).await.unwrap();
        let state = controller.complete(session_id, 1, device, 80, &[]).await.unwrap();
        assert_eq!(state.worlds[0].status, WorldStatus::Completed);
    }

    #[tokio::test]
    async fn completed_world_refuses_reentry() {
        let (controller, session_id) = controller().await;
        let device = Uuid::new_v4();

        controller.enter(session_id, 1, device).await.unwrap();
        controller.complete(session_id, 1, device, 95, &[]).await.unwrap();

        let err = controller.enter(session_id, 1, device).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn retried_complete_is_idempotent_after_lease_release() {
        let (controller, session_id) = controller().await;
        let device = Uuid::new_v4();

        controller.enter(session_id, 1, device).await.unwrap();
        let first = controller.complete(session_id, 1, device, 90, &[]).await.unwrap();
        let second = controller.complete(session_id, 1, device, 90, &[]).await.unwrap();
        assert_eq!(first.session.total_score, second.session.total_score);
    }
}
