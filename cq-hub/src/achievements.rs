//! Achievement aggregator
//!
//! A pure function over a `HubState` snapshot: no incremental bookkeeping
//! between invocations, so partial updates can never leave the achievement
//! set drifted from the progress that justifies it. Re-run on every commit.
//!
//! Ids are stable strings; adding a new achievement means adding a registry
//! entry, never shifting an implicit bit position.

use std::collections::BTreeSet;

use cq_common::types::{HubState, WorldStatus, WORLD_COUNT};

/// One cross-world achievement: stable id plus its unlock predicate
struct MetaAchievement {
    id: &'static str,
    predicate: fn(&HubState) -> bool,
}

/// Registry of cross-world achievements.
///
/// Single-world achievements arrive as flags from world completion and are
/// stored alongside these; only cross-world predicates are evaluated here.
const REGISTRY: &[MetaAchievement] = &[
    MetaAchievement {
        id: "first-steps",
        predicate: |state| completed_count(state) >= 1,
    },
    MetaAchievement {
        id: "halfway-there",
        predicate: |state| completed_count(state) >= 3,
    },
    MetaAchievement {
        id: "grand-tour",
        predicate: |state| completed_count(state) == WORLD_COUNT as usize,
    },
    MetaAchievement {
        id: "excellence-all-round",
        predicate: |state| {
            completed_count(state) == WORLD_COUNT as usize
                && state
                    .worlds
                    .iter()
                    .all(|w| w.score.is_some_and(|s| s >= 90))
        },
    },
    MetaAchievement {
        id: "swift-learner",
        predicate: |state| {
            state.worlds.iter().any(|w| {
                match (w.started_at, w.completed_at) {
                    (Some(start), Some(end)) => (end - start) <= chrono::Duration::minutes(10),
                    _ => false,
                }
            })
        },
    },
];

fn completed_count(state: &HubState) -> usize {
    state
        .worlds
        .iter()
        .filter(|w| w.status == WorldStatus::Completed)
        .count()
}

/// Evaluate all cross-world predicates against a snapshot.
///
/// Returns every id that currently holds; the caller diffs against the
/// stored set to find new unlocks. Deliberately recomputes from scratch.
pub fn evaluate(state: &HubState) -> BTreeSet<String> {
    REGISTRY
        .iter()
        .filter(|a| (a.predicate)(state))
        .map(|a| a.id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cq_common::types::{CulturalContext, HubSession, WorldProgress};
    use uuid::Uuid;

    fn state_with_completions(scores: &[(u8, i64)]) -> HubState {
        let now = Utc::now();
        let mut worlds: Vec<WorldProgress> = (1..=WORLD_COUNT).map(WorldProgress::locked).collect();
        for &(index, score) in scores {
            let w = &mut worlds[(index - 1) as usize];
            w.status = WorldStatus::Completed;
            w.score = Some(score);
            w.started_at = Some(now - chrono::Duration::hours(1));
            w.completed_at = Some(now);
        }
        HubState {
            session: HubSession {
                session_id: Uuid::new_v4(),
                code_hash: "0".repeat(64),
                cultural_context: CulturalContext::default(),
                total_score: scores.iter().map(|(_, s)| s).sum(),
                worlds_completed: scores.len() as u8,
                clock: 0,
                created_at: now,
                last_active_at: now,
                expires_at: now + chrono::Duration::days(30),
            },
            worlds,
            achievements: Vec::new(),
        }
    }

    #[test]
    fn empty_hub_unlocks_nothing() {
        assert!(evaluate(&state_with_completions(&[])).is_empty());
    }

    #[test]
    fn single_completion_unlocks_first_steps_only() {
        let unlocked = evaluate(&state_with_completions(&[(1, 85)]));
        assert!(unlocked.contains("first-steps"));
        assert!(!unlocked.contains("halfway-there"));
        assert!(!unlocked.contains("grand-tour"));
    }

    #[test]
    fn all_five_at_ninety_unlocks_excellence() {
        let unlocked =
            evaluate(&state_with_completions(&[(1, 95), (2, 90), (3, 92), (4, 90), (5, 99)]));
        assert!(unlocked.contains("grand-tour"));
        assert!(unlocked.contains("excellence-all-round"));
    }

    #[test]
    fn one_weak_score_blocks_excellence_but_not_grand_tour() {
        let unlocked =
            evaluate(&state_with_completions(&[(1, 95), (2, 89), (3, 92), (4, 90), (5, 99)]));
        assert!(unlocked.contains("grand-tour"));
        assert!(!unlocked.contains("excellence-all-round"));
    }

    #[test]
    fn evaluation_is_stateless_and_repeatable() {
        let state = state_with_completions(&[(1, 85), (2, 91), (3, 88)]);
        assert_eq!(evaluate(&state), evaluate(&state));
    }

    #[test]
    fn swift_learner_needs_a_fast_completion() {
        let mut state = state_with_completions(&[(1, 85)]);
        assert!(!evaluate(&state).contains("swift-learner"));

        let w = &mut state.worlds[0];
        w.started_at = Some(w.completed_at.unwrap() - chrono::Duration::minutes(5));
        assert!(evaluate(&state).contains("swift-learner"));
    }
}
