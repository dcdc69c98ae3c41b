//! Shared server state.
//!
//! Everything the dispatcher and the loops touch, constructed once at
//! startup and passed explicitly — no process-wide singletons.

use std::sync::Arc;

use parley_core::ServerConfig;
use parley_service::Services;

use crate::conn::ConnectionMap;
use crate::registry::RoomRegistry;
use crate::session::SessionStore;

pub struct ServerState {
    pub config: ServerConfig,
    pub connections: ConnectionMap,
    pub registry: RoomRegistry,
    /// Shared with the background sweeper task.
    pub sessions: Arc<SessionStore>,
    pub services: Services,
}

impl ServerState {
    pub fn new(config: ServerConfig, services: Services) -> Self {
        Self {
            connections: ConnectionMap::new(config.max_write_buffer),
            registry: RoomRegistry::new(),
            sessions: Arc::new(SessionStore::new(config.token_expire)),
            config,
            services,
        }
    }
}
