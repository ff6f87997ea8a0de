//! cq-hub library - CivicQuest progression hub service
//!
//! Hosts the progression engine behind an HTTP API: anonymous access-code
//! sessions, the five-world hub, per-world session control with device
//! leases, cross-device sync, achievements, and data-subject rights.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use cq_common::events::EventBus;

pub mod achievements;
pub mod api;
pub mod auth;
pub mod content;
pub mod db;
pub mod hub;
pub mod retention;
pub mod sse;
pub mod sync;
pub mod worlds;

use auth::CodeAuthenticator;
use hub::HubStateManager;
use sync::Synchronizer;
use worlds::WorldSessionController;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub auth: Arc<CodeAuthenticator>,
    pub hub: Arc<HubStateManager>,
    pub controller: Arc<WorldSessionController>,
    pub sync: Arc<Synchronizer>,
}

impl AppState {
    pub fn new(
        pool: sqlx::SqlitePool,
        config: cq_common::config::EngineConfig,
        provider: Arc<dyn content::ContentProvider>,
    ) -> Self {
        let bus = EventBus::new(config.event_capacity);
        let auth = Arc::new(CodeAuthenticator::new(pool.clone(), config.clone(), bus.clone()));
        let hub = Arc::new(HubStateManager::new(pool, config, bus.clone(), provider));
        let controller = Arc::new(WorldSessionController::new(hub.clone()));
        let sync = Arc::new(Synchronizer::new(hub.clone()));
        Self {
            bus,
            auth,
            hub,
            controller,
            sync,
        }
    }
}

/// Build the application router.
///
/// Protected routes resolve the session from the `X-Access-Code` header.
/// Session issuance, code validation, the SSE stream (query-parameter auth)
/// and the health probe stay public.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/hub", get(api::hub_snapshot))
        .route("/api/worlds/:index/enter", post(api::enter_world))
        .route("/api/worlds/:index/checkpoint", post(api::checkpoint_world))
        .route("/api/worlds/:index/complete", post(api::complete_world))
        .route("/api/worlds/:index/abandon", post(api::abandon_world))
        .route("/api/sync", post(api::merge_deltas))
        .route("/api/data/export", get(api::export_data))
        .route("/api/data", delete(api::erase_data))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_session,
        ));

    let public = Router::new()
        .route("/api/session", post(api::create_session))
        .route("/api/session/validate", post(api::validate_session))
        .route("/api/events", get(api::event_stream))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(CorsLayer::permissive())
}
