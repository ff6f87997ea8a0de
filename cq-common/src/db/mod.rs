//! Database access shared across engine components

pub mod init;
pub mod settings;

pub use init::{connect_memory, init_database};
