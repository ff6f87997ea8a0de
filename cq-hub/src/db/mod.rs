//! Persistence repositories for the progression engine

pub mod achievements;
pub mod deltas;
pub mod leases;
pub mod progress;
pub mod retry;
pub mod sessions;
