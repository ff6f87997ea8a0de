//! Hub state manager
//!
//! Single owner of `HubSession` mutation. Every accepted world completion
//! flows through here: score totals, unlock eligibility, achievement
//! re-evaluation, persistence commit, and the broadcast to other devices.
//!
//! Sessions are serialized through a per-session async mutex so two requests
//! for the same session never interleave their read-modify-write cycles;
//! requests for different sessions proceed concurrently.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use cq_common::config::EngineConfig;
use cq_common::events::{EventBus, HubEvent};
use cq_common::types::{check_world_index, HubState, WorldStatus, WORLD_COUNT};
use cq_common::{Error, Result};

use crate::content::ContentProvider;
use crate::db::{achievements as achievements_db, progress, retry::retry_commit, sessions};

pub struct HubStateManager {
    pool: SqlitePool,
    config: EngineConfig,
    bus: EventBus,
    provider: Arc<dyn ContentProvider>,
    session_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl HubStateManager {
    pub fn new(
        pool: SqlitePool,
        config: EngineConfig,
        bus: EventBus,
        provider: Arc<dyn ContentProvider>,
    ) -> Self {
        Self {
            pool,
            config,
            bus,
            provider,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn provider(&self) -> &Arc<dyn ContentProvider> {
        &self.provider
    }

    /// Per-session mutex; operations on one session are strictly ordered
    pub fn session_lock(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock().expect("session lock registry poisoned");
        locks.entry(session_id).or_default().clone()
    }

    /// Drop the lock entry when a session is erased
    pub fn forget_session(&self, session_id: Uuid) {
        let mut locks = self.session_locks.lock().expect("session lock registry poisoned");
        locks.remove(&session_id);
    }

    /// Drop registry entries no operation currently holds.
    ///
    /// The registry's own `Arc` is the only reference once every in-flight
    /// operation has finished, so a strong count of 1 marks an idle entry.
    /// Called by the retention sweeper so expired sessions do not leave
    /// their mutexes behind.
    pub fn prune_session_locks(&self) -> usize {
        let mut locks = self.session_locks.lock().expect("session lock registry poisoned");
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    #[cfg(test)]
    pub(crate) fn tracked_session_count(&self) -> usize {
        self.session_locks.lock().expect("session lock registry poisoned").len()
    }

    /// Load the hub snapshot for a validated session
    pub async fn load(&self, session_id: Uuid) -> Result<HubState> {
        sessions::load_state(&self.pool, session_id).await
    }

    /// Locked worlds whose predecessor satisfies the unlock rule: world n+1
    /// unlocks only when world n is completed with a score at or above the
    /// content-declared minimum
    pub fn compute_unlock_eligibility(&self, state: &HubState) -> Vec<u8> {
        let mut eligible = Vec::new();
        for index in 2..=WORLD_COUNT {
            let current = &state.worlds[(index - 1) as usize];
            if current.status != WorldStatus::Locked {
                continue;
            }
            let previous = &state.worlds[(index - 2) as usize];
            if previous.status == WorldStatus::Completed
                && previous
                    .score
                    .is_some_and(|s| s >= self.provider.min_score(index - 1))
            {
                eligible.push(index);
            }
        }
        eligible
    }

    /// Apply a world completion.
    ///
    /// Idempotent per (session, world): re-applying to an already-completed
    /// world is a no-op that returns the unchanged state. This is what makes
    /// retried network calls safe against double-counted scores.
    pub async fn apply_world_completion(
        &self,
        session_id: Uuid,
        world_index: u8,
        score: i64,
        achievement_flags: &[String],
        device_id: Option<Uuid>,
    ) -> Result<HubState> {
        check_world_index(world_index)?;
        if score < 0 {
            return Err(Error::InvalidInput(format!("Negative score {}", score)));
        }

        let state = sessions::load_state(&self.pool, session_id).await?;
        let world = state.world(world_index)?;

        match world.status {
            WorldStatus::Completed => {
                debug!(
                    session_id = %session_id,
                    world_index,
                    "Completion re-applied to completed world, returning unchanged state"
                );
                return Ok(state);
            }
            WorldStatus::InProgress => {}
            other => {
                return Err(Error::InvalidInput(format!(
                    "World {} cannot complete from status {}",
                    world_index,
                    other.as_str()
                )));
            }
        }

        let clock = state.session.clock + 1;
        let ceiling = self.config.commit_retry_ceiling_ms;
        retry_commit("record world completion", ceiling, || {
            progress::record_completion(&self.pool, session_id, world_index, score, clock, device_id)
        })
        .await?;

        if !achievement_flags.is_empty() {
            let flags = achievement_flags.iter().cloned().collect();
            achievements_db::unlock(
                &self.pool,
                session_id,
                &flags,
                cq_common::types::AchievementScope::SingleWorld,
            )
            .await?;
        }

        self.bus.emit(HubEvent::WorldCompleted {
            session_id,
            world_index,
            score,
            timestamp: Utc::now(),
        });
        info!(session_id = %session_id, world_index, score, "World completed");

        self.finalize(session_id, clock, device_id).await
    }

    /// Recompute totals and unlocks from the world rows, re-run the
    /// achievement aggregator, commit, and broadcast.
    ///
    /// Shared by the completion path and the synchronizer so both converge
    /// on identical derived state. The total is always recomputed from the
    /// completed world scores, keeping the hub invariant by construction.
    pub(crate) async fn finalize(
        &self,
        session_id: Uuid,
        clock: u64,
        device_id: Option<Uuid>,
    ) -> Result<HubState> {
        let worlds = progress::load_worlds(&self.pool, session_id).await?;
        let total_score: i64 = worlds
            .iter()
            .filter(|w| w.status == WorldStatus::Completed)
            .filter_map(|w| w.score)
            .sum();
        let worlds_completed = worlds
            .iter()
            .filter(|w| w.status == WorldStatus::Completed)
            .count() as u8;

        let ceiling = self.config.commit_retry_ceiling_ms;
        retry_commit("commit hub totals", ceiling, || {
            sessions::update_totals(&self.pool, session_id, total_score, worlds_completed, clock)
        })
        .await?;

        let mut state = sessions::load_state(&self.pool, session_id).await?;

        for index in self.compute_unlock_eligibility(&state) {
            progress::update_status(
                &self.pool,
                session_id,
                index,
                WorldStatus::Unlocked,
                clock,
                device_id,
            )
            .await?;
            state.worlds[(index - 1) as usize].status = WorldStatus::Unlocked;
            self.bus.emit(HubEvent::WorldStatusChanged {
                session_id,
                world_index: index,
                status: WorldStatus::Unlocked,
                timestamp: Utc::now(),
            });
            info!(session_id = %session_id, world_index = index, "World unlocked");
        }

        // Cross-world achievements are recomputed from the snapshot, never
        // patched incrementally
        let meta = crate::achievements::evaluate(&state);
        let newly = achievements_db::unlock(
            &self.pool,
            session_id,
            &meta,
            cq_common::types::AchievementScope::CrossWorld,
        )
        .await?;
        if !newly.is_empty() {
            state.achievements = achievements_db::load_ids(&self.pool, session_id)
                .await?
                .into_iter()
                .collect();
            self.bus.emit(HubEvent::AchievementsUnlocked {
                session_id,
                achievement_ids: newly,
                timestamp: Utc::now(),
            });
        }

        self.bus.emit(HubEvent::HubUpdated {
            session_id,
            total_score: state.session.total_score,
            worlds_completed: state.session.worlds_completed,
            timestamp: Utc::now(),
        });

        Ok(state)
    }
}
