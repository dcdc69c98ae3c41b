//! Admin service — room lifecycle operations.

use std::sync::Arc;

use parley_core::Room;
use parley_db::{QueryResult, RoomStore};

use crate::result::{ErrorCode, ServiceResult};
use crate::user::internal;

pub struct AdminService {
    rooms: Arc<dyn RoomStore>,
}

impl AdminService {
    pub fn new(rooms: Arc<dyn RoomStore>) -> Self {
        Self { rooms }
    }

    pub async fn create_room(
        &self,
        admin_id: i64,
        name: &str,
        description: &str,
        max_users: i64,
    ) -> ServiceResult<Room> {
        if name.is_empty() {
            return ServiceResult::fail(ErrorCode::BadRequest, "room name is required");
        }
        if max_users < 0 {
            return ServiceResult::fail(ErrorCode::BadRequest, "max_users must be non-negative");
        }

        match self
            .rooms
            .create_room(admin_id, name, description, max_users)
            .await
        {
            QueryResult::Success(room) => ServiceResult::ok(room, "room created"),
            other => internal(other, "create_room"),
        }
    }

    pub async fn delete_room(&self, room_id: i64) -> ServiceResult<()> {
        self.unit(self.rooms.delete_room(room_id).await, "delete_room")
    }

    pub async fn set_room_status(&self, room_id: i64, active: bool) -> ServiceResult<()> {
        self.unit(self.rooms.set_status(room_id, active).await, "set_room_status")
    }

    pub async fn set_room_name(&self, room_id: i64, name: &str) -> ServiceResult<()> {
        if name.is_empty() {
            return ServiceResult::fail(ErrorCode::BadRequest, "room name is required");
        }
        self.unit(self.rooms.set_name(room_id, name).await, "set_room_name")
    }

    pub async fn set_room_description(
        &self,
        room_id: i64,
        description: &str,
    ) -> ServiceResult<()> {
        self.unit(
            self.rooms.set_description(room_id, description).await,
            "set_room_description",
        )
    }

    pub async fn set_room_max_users(&self, room_id: i64, max_users: i64) -> ServiceResult<()> {
        if max_users < 0 {
            return ServiceResult::fail(ErrorCode::BadRequest, "max_users must be non-negative");
        }
        self.unit(
            self.rooms.set_max_users(room_id, max_users).await,
            "set_room_max_users",
        )
    }

    fn unit(&self, result: QueryResult<()>, op: &str) -> ServiceResult<()> {
        match result {
            QueryResult::Success(()) => ServiceResult::ok_empty("ok"),
            QueryResult::NotFound(_) => {
                ServiceResult::fail(ErrorCode::NotFound, "room does not exist")
            }
            other => internal(other, op),
        }
    }
}
