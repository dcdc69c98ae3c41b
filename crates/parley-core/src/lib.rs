//! Core types shared across the Parley chat server.
//!
//! Domain models (users, rooms, messages), environment-driven
//! configuration, `.env` file loading, timestamp helpers, and the
//! password hashing primitive pair.

pub mod config;
pub mod env;
pub mod password;
pub mod time;
pub mod types;

pub use config::{ConfigError, DbConfig, ServerConfig};
pub use types::{Role, Room, StoredMessage, User};
