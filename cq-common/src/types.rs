//! Core domain types for the multi-world progression engine
//!
//! A `HubSession` aggregates total score and per-world status across the five
//! content worlds. Each world slot carries a `WorldProgress` record whose
//! status advances monotonically; the opaque state blob inside it belongs to
//! the content provider and is never interpreted by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Number of playable world slots per session
pub const WORLD_COUNT: u8 = 5;

/// Validate a 1-based world index
pub fn check_world_index(index: u8) -> Result<()> {
    if index >= 1 && index <= WORLD_COUNT {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "World index must be 1..{}, got {}",
            WORLD_COUNT, index
        )))
    }
}

/// Per-world lifecycle status
///
/// Transitions are strictly monotonic except for the `Abandoned` detour,
/// which is reachable only from `InProgress` and may resume back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldStatus {
    Locked,
    Unlocked,
    InProgress,
    Completed,
    Abandoned,
}

impl WorldStatus {
    /// Whether a transition from `self` to `next` is permitted
    pub fn can_transition_to(self, next: WorldStatus) -> bool {
        use WorldStatus::*;
        matches!(
            (self, next),
            (Locked, Unlocked)
                | (Unlocked, InProgress)
                | (InProgress, Completed)
                | (InProgress, Abandoned)
                | (Abandoned, InProgress)
        )
    }

    /// Ordering rank used by the synchronizer's last-writer-wins merge.
    ///
    /// `Abandoned` ranks with `InProgress`: both mean "entered, not finished".
    pub fn rank(self) -> u8 {
        match self {
            WorldStatus::Locked => 0,
            WorldStatus::Unlocked => 1,
            WorldStatus::InProgress => 2,
            WorldStatus::Abandoned => 2,
            WorldStatus::Completed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorldStatus::Locked => "locked",
            WorldStatus::Unlocked => "unlocked",
            WorldStatus::InProgress => "in_progress",
            WorldStatus::Completed => "completed",
            WorldStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "locked" => Ok(WorldStatus::Locked),
            "unlocked" => Ok(WorldStatus::Unlocked),
            "in_progress" => Ok(WorldStatus::InProgress),
            "completed" => Ok(WorldStatus::Completed),
            "abandoned" => Ok(WorldStatus::Abandoned),
            other => Err(Error::Internal(format!("Unknown world status: {}", other))),
        }
    }
}

/// Cultural / municipal context tag carried by a session.
///
/// Resolved once at world-load time into a content descriptor; the engine
/// treats it as an opaque market tag and never branches on its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CulturalContext(pub String);

impl CulturalContext {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CulturalContext {
    fn default() -> Self {
        Self("default".to_string())
    }
}

/// Progress record for one world slot (1..=5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldProgress {
    pub world_index: u8,
    pub status: WorldStatus,
    /// Final score, set only when status reaches `Completed`
    pub score: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Compressed, content-specific state blob (opaque to the engine)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_blob: Option<Vec<u8>>,
    /// Logical clock of the writer that last set `status`
    #[serde(skip)]
    pub status_lamport: u64,
    #[serde(skip)]
    pub status_device: Option<Uuid>,
    /// Logical clock of the writer that last set `state_blob`
    #[serde(skip)]
    pub blob_lamport: u64,
    #[serde(skip)]
    pub blob_device: Option<Uuid>,
}

impl WorldProgress {
    pub fn locked(world_index: u8) -> Self {
        Self {
            world_index,
            status: WorldStatus::Locked,
            score: None,
            started_at: None,
            completed_at: None,
            state_blob: None,
            status_lamport: 0,
            status_device: None,
            blob_lamport: 0,
            blob_device: None,
        }
    }
}

/// A session's hub record: identity, totals, and retention timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSession {
    pub session_id: Uuid,
    /// SHA-256 hex of the access code; the cleartext code is never stored
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub cultural_context: CulturalContext,
    pub total_score: i64,
    pub worlds_completed: u8,
    /// Highest logical clock value merged into this session
    pub clock: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Full hub snapshot: session totals plus the five world slots and the
/// session's unlocked achievement ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubState {
    pub session: HubSession,
    /// Always exactly `WORLD_COUNT` entries, ordered by world index
    pub worlds: Vec<WorldProgress>,
    /// Stable achievement ids, sorted for a deterministic encoding
    pub achievements: Vec<String>,
}

impl HubState {
    pub fn world(&self, index: u8) -> Result<&WorldProgress> {
        check_world_index(index)?;
        Ok(&self.worlds[(index - 1) as usize])
    }
}

/// Handle returned by successful code validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub cultural_context: CulturalContext,
}

/// One unit of cross-device reconciliation.
///
/// Ephemeral: appended to the audit log and marked applied once merged into
/// the authoritative `HubSession`. Never itself a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDelta {
    pub device_id: Uuid,
    pub session_id: Uuid,
    /// Lamport clock of the originating device at emission time
    pub lamport: u64,
    pub payload: DeltaPayload,
}

/// Typed delta payload.
///
/// Scalar fields merge last-writer-wins by (lamport, device id); achievement
/// flags merge by set union; conflicting completions keep the higher score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaPayload {
    /// Interim world state produced offline (a late checkpoint from an
    /// evicted lease holder arrives through this path)
    Checkpoint {
        world_index: u8,
        /// Content blob, already compressed by the emitting device
        state_blob: Vec<u8>,
    },
    /// World completion recorded offline
    Completion {
        world_index: u8,
        score: i64,
        #[serde(default)]
        achievement_flags: Vec<String>,
    },
    /// Status movement without a score (enter / abandon recorded offline)
    StatusChange {
        world_index: u8,
        status: WorldStatus,
    },
}

impl DeltaPayload {
    pub fn world_index(&self) -> u8 {
        match self {
            DeltaPayload::Checkpoint { world_index, .. } => *world_index,
            DeltaPayload::Completion { world_index, .. } => *world_index,
            DeltaPayload::StatusChange { world_index, .. } => *world_index,
        }
    }
}

/// Achievement scope: bound to one world or spanning several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementScope {
    SingleWorld,
    CrossWorld,
}

/// An unlocked achievement as stored per session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockedAchievement {
    pub id: String,
    pub scope: AchievementScope,
    pub unlocked_at: DateTime<Utc>,
}
