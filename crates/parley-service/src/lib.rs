//! Parley domain services.
//!
//! A thin layer translating store-level `QueryResult` sub-codes into
//! the service taxonomy handlers put on the wire. No socket or
//! registry state lives here; everything is a value passed in at
//! construction.

pub mod admin;
pub mod chat;
pub mod result;
pub mod user;

pub use admin::AdminService;
pub use chat::ChatService;
pub use result::{ErrorCode, ServiceResult};
pub use user::UserService;

use std::sync::Arc;

use parley_db::{MessageStore, RoomStore, UserStore};

/// The full service surface, constructed once at startup and handed to
/// the dispatcher.
pub struct Services {
    pub user: UserService,
    pub chat: ChatService,
    pub admin: AdminService,
}

impl Services {
    pub fn new(
        users: Arc<dyn UserStore>,
        rooms: Arc<dyn RoomStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            user: UserService::new(Arc::clone(&users)),
            chat: ChatService::new(Arc::clone(&rooms), messages),
            admin: AdminService::new(rooms),
        }
    }
}
