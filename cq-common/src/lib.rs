//! # CivicQuest Common Library
//!
//! Shared code for the multi-world progression engine:
//! - Domain types (HubSession, WorldProgress, SyncDelta)
//! - Error taxonomy
//! - Event types (HubEvent enum) and broadcast bus
//! - Access code generation, normalization, and hashing
//! - Engine configuration loading
//! - Database initialization and settings
//! - Blob compression helpers

pub mod codes;
pub mod compress;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use types::{HubSession, HubState, WorldProgress, WorldStatus, WORLD_COUNT};
