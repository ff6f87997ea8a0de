//! Common error types for the CivicQuest progression engine

use thiserror::Error;

/// Common result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by all engine components
#[derive(Error, Debug)]
pub enum Error {
    /// Access code does not match any known session
    #[error("Invalid access code")]
    InvalidCode,

    /// Access code matched a session past its retention window
    #[error("Access code expired")]
    Expired,

    /// World entry refused because the unlock rule is unmet
    #[error("World {0} is locked")]
    WorldLocked(u8),

    /// Another device currently holds the lease on this world slot
    #[error("World {0} is already active on another device")]
    WorldAlreadyActive(u8),

    /// Code issuance exhausted its bounded retry budget
    #[error("Access code generation exhausted after {0} attempts")]
    GenerationExhausted(u32),

    /// Durable commit failed past the retry ceiling
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Content bundle load exceeded the ceiling and no fallback succeeded
    #[error("Content load timed out for world {0}")]
    ContentLoadTimeout(u8),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
