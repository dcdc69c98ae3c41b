//! Chat service — message persistence, history, and room listings.

use std::sync::Arc;

use parley_core::{Room, StoredMessage};
use parley_db::store::DEFAULT_HISTORY_LIMIT;
use parley_db::{MessageStore, QueryResult, RoomStore};

use crate::result::{ErrorCode, ServiceResult};
use crate::user::internal;

pub struct ChatService {
    rooms: Arc<dyn RoomStore>,
    messages: Arc<dyn MessageStore>,
}

impl ChatService {
    pub fn new(rooms: Arc<dyn RoomStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { rooms, messages }
    }

    /// Persist a message. Content-length policy is enforced at the
    /// dispatcher boundary, not here.
    pub async fn send_message(
        &self,
        user_id: i64,
        room_id: i64,
        content: &str,
        display_name: &str,
        send_time: &str,
    ) -> ServiceResult<()> {
        match self
            .messages
            .append(user_id, room_id, content, display_name, send_time)
            .await
        {
            QueryResult::Success(()) => ServiceResult::ok_empty("message stored"),
            other => internal(other, "send_message"),
        }
    }

    /// Up to `limit` newest messages in the room (default 50).
    pub async fn get_message_history(
        &self,
        room_id: i64,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<StoredMessage>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, DEFAULT_HISTORY_LIMIT);
        match self.messages.recent(room_id, limit).await {
            QueryResult::Success(messages) => ServiceResult::ok(messages, "history fetched"),
            other => internal(other, "get_message_history"),
        }
    }

    pub async fn get_active_rooms(&self) -> ServiceResult<Vec<Room>> {
        match self.rooms.active_rooms().await {
            QueryResult::Success(rooms) => ServiceResult::ok(rooms, "active rooms fetched"),
            other => internal(other, "get_active_rooms"),
        }
    }

    pub async fn get_all_rooms(&self) -> ServiceResult<Vec<Room>> {
        match self.rooms.all_rooms().await {
            QueryResult::Success(rooms) => ServiceResult::ok(rooms, "rooms fetched"),
            other => internal(other, "get_all_rooms"),
        }
    }

    pub async fn get_room_info(&self, room_id: i64) -> ServiceResult<Room> {
        match self.rooms.room_by_id(room_id).await {
            QueryResult::Success(room) => ServiceResult::ok(room, "room found"),
            QueryResult::NotFound(_) => {
                ServiceResult::fail(ErrorCode::NotFound, "room does not exist")
            }
            other => internal(other, "get_room_info"),
        }
    }
}
