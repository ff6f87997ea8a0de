//! HTTP API handlers for cq-hub

pub mod error;
pub mod events;
pub mod health;
pub mod hub;
pub mod middleware;
pub mod rights;
pub mod sessions;
pub mod sync;
pub mod worlds;

pub use error::{ApiError, ApiResult};
pub use events::event_stream;
pub use health::health_routes;
pub use hub::hub_snapshot;
pub use middleware::require_session;
pub use rights::{erase_data, export_data};
pub use sessions::{create_session, validate_session};
pub use sync::merge_deltas;
pub use worlds::{abandon_world, checkpoint_world, complete_world, enter_world};
