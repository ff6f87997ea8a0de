//! Retention sweeper
//!
//! Background task that erases sessions whose inactivity window elapsed.
//! Erasure goes through the same cascading delete as an explicit erase
//! request, so expiry and the right-to-erasure leave identical (empty)
//! footprints.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::hub::HubStateManager;

/// How often the sweeper wakes up. Retention is measured in days, so an
/// hourly pass keeps deletion timely without measurable load.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the periodic sweep. Runs until the process exits.
pub fn spawn_sweeper(hub: Arc<HubStateManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match crate::db::sessions::sweep_expired(hub.pool()).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Retention sweep erased expired sessions"),
                Err(e) => error!("Retention sweep failed: {}", e),
            }
            // Swept sessions must not leave their mutexes in the registry
            hub.prune_session_locks();
        }
    })
}
