//! Code authenticator
//!
//! Issues and validates the anonymous 8-character access codes. Codes are
//! hashed before touching storage and never travel back to a caller except
//! once, in cleartext, at issuance.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use cq_common::codes::{generate_code, hash_code, normalize_code};
use cq_common::config::EngineConfig;
use cq_common::events::{EventBus, HubEvent};
use cq_common::types::{CulturalContext, HubSession, SessionHandle};
use cq_common::{Error, Result};

use crate::db::sessions;

pub struct CodeAuthenticator {
    pool: SqlitePool,
    config: EngineConfig,
    bus: EventBus,
}

impl CodeAuthenticator {
    pub fn new(pool: SqlitePool, config: EngineConfig, bus: EventBus) -> Self {
        Self { pool, config, bus }
    }

    /// Issue a fresh access code and create its session.
    ///
    /// The candidate is checked against the active-code index before
    /// acceptance; a collision triggers a new random draw, bounded by the
    /// configured retry limit. The cleartext code is returned exactly once.
    pub async fn issue(&self, context: &CulturalContext) -> Result<(String, HubSession)> {
        for attempt in 1..=self.config.code_retry_limit {
            let code = generate_code();
            let hash = hash_code(&code);

            // Uniqueness matters only among non-expired codes; an expired
            // session with the same hash loses the index race by expires_at
            // ordering and falls to the retention sweep
            if let Some(existing) = sessions::find_by_code_hash(&self.pool, &hash).await? {
                if existing.expires_at > Utc::now() {
                    debug!(attempt, "Access code collision against active index, redrawing");
                    continue;
                }
            }

            let session =
                sessions::create_session(&self.pool, &hash, context, self.config.retention()).await?;
            info!(session_id = %session.session_id, "Issued new session");
            self.bus.emit(HubEvent::SessionCreated {
                session_id: session.session_id,
                timestamp: session.created_at,
            });
            return Ok((code, session));
        }

        Err(Error::GenerationExhausted(self.config.code_retry_limit))
    }

    /// Validate an entered code.
    ///
    /// Side-effect-free except for bumping `last_active_at` (which extends
    /// the retention window). One indexed lookup plus one update, well
    /// inside the entry-point latency budget.
    pub async fn validate(&self, input: &str) -> Result<SessionHandle> {
        let code = normalize_code(input)?;
        let hash = hash_code(&code);

        let session = sessions::find_by_code_hash(&self.pool, &hash)
            .await?
            .ok_or(Error::InvalidCode)?;

        if session.expires_at <= Utc::now() {
            // Expired rows need not wait for the hourly sweep
            sessions::erase_session(&self.pool, session.session_id).await?;
            debug!(session_id = %session.session_id, "Erased expired session at validation");
            return Err(Error::Expired);
        }

        sessions::touch(&self.pool, session.session_id, self.config.retention()).await?;

        Ok(SessionHandle {
            session_id: session.session_id,
            cultural_context: session.cultural_context,
        })
    }
}
