//! In-memory stores.
//!
//! Same trait surface and sub-code behaviour as the MySQL stores,
//! backed by plain maps. Used by service and dispatcher tests, and by
//! anything that wants a database-free run.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use parley_core::time::now_string;
use parley_core::{Role, Room, StoredMessage, User, password};

use crate::result::{QueryResult, subcode};
use crate::store::{MessageStore, RoomStore, UserStore, pick_discriminator};

#[derive(Debug, Clone)]
struct UserRecord {
    user: User,
    password_hash: String,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<UserRecord>,
    rooms: Vec<Room>,
    messages: Vec<StoredMessage>,
    next_user_id: i64,
    next_room_id: i64,
    next_message_id: i64,
}

/// One shared in-memory database implementing all three store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user directly, bypassing registration. Returns the user.
    pub fn seed_user(&self, name: &str, email: &str, password: &str, role: Role) -> User {
        let mut state = self.state.lock().unwrap();
        state.next_user_id += 1;
        let used: HashSet<String> = state
            .users
            .iter()
            .filter(|r| r.user.name == name)
            .map(|r| r.user.discriminator.clone())
            .collect();
        let discriminator = pick_discriminator(&used).expect("seeded name exhausted");
        let user = User {
            id: state.next_user_id,
            name: name.to_string(),
            discriminator,
            email: email.to_string(),
            role,
            created_time: now_string(),
        };
        state.users.push(UserRecord {
            user: user.clone(),
            password_hash: password::hash_password(password),
        });
        user
    }

    /// Number of stored messages, for assertions.
    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> QueryResult<User> {
        let mut state = self.state.lock().unwrap();

        if state.users.iter().any(|r| r.user.email == email) {
            return QueryResult::not_found_with(subcode::EMAIL_TAKEN);
        }

        let used: HashSet<String> = state
            .users
            .iter()
            .filter(|r| r.user.name == name)
            .map(|r| r.user.discriminator.clone())
            .collect();
        let Some(discriminator) = pick_discriminator(&used) else {
            return QueryResult::not_found_with(subcode::NAME_EXHAUSTED);
        };

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            name: name.to_string(),
            discriminator,
            email: email.to_string(),
            role,
            created_time: now_string(),
        };
        state.users.push(UserRecord {
            user: user.clone(),
            password_hash: password_hash.to_string(),
        });
        QueryResult::Success(user)
    }

    async fn authenticate(&self, email: &str, password: &str) -> QueryResult<User> {
        let state = self.state.lock().unwrap();
        let Some(record) = state.users.iter().find(|r| r.user.email == email) else {
            return QueryResult::not_found();
        };
        if !password::verify_password(password, &record.password_hash) {
            return QueryResult::not_found_with(subcode::WRONG_PASSWORD);
        }
        QueryResult::Success(record.user.clone())
    }

    async fn change_password(
        &self,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> QueryResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.users.iter_mut().find(|r| r.user.email == email) else {
            return QueryResult::not_found();
        };
        if !password::verify_password(old_password, &record.password_hash) {
            return QueryResult::not_found_with(subcode::WRONG_PASSWORD);
        }
        record.password_hash = password::hash_password(new_password);
        QueryResult::Success(())
    }

    async fn change_display_name(&self, user_id: i64, name: &str) -> QueryResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.users.iter().any(|r| r.user.id == user_id) {
            return QueryResult::not_found();
        }

        let used: HashSet<String> = state
            .users
            .iter()
            .filter(|r| r.user.name == name && r.user.id != user_id)
            .map(|r| r.user.discriminator.clone())
            .collect();
        let Some(discriminator) = pick_discriminator(&used) else {
            return QueryResult::not_found_with(subcode::NAME_EXHAUSTED);
        };

        let record = state
            .users
            .iter_mut()
            .find(|r| r.user.id == user_id)
            .expect("checked above");
        record.user.name = name.to_string();
        record.user.discriminator = discriminator;
        QueryResult::Success(())
    }

    async fn user_by_id(&self, id: i64) -> QueryResult<User> {
        let state = self.state.lock().unwrap();
        match state.users.iter().find(|r| r.user.id == id) {
            Some(record) => QueryResult::Success(record.user.clone()),
            None => QueryResult::not_found(),
        }
    }

    async fn user_by_email(&self, email: &str) -> QueryResult<User> {
        let state = self.state.lock().unwrap();
        match state.users.iter().find(|r| r.user.email == email) {
            Some(record) => QueryResult::Success(record.user.clone()),
            None => QueryResult::not_found(),
        }
    }

    async fn user_by_full_name(&self, name: &str, discriminator: &str) -> QueryResult<User> {
        let state = self.state.lock().unwrap();
        match state
            .users
            .iter()
            .find(|r| r.user.name == name && r.user.discriminator == discriminator)
        {
            Some(record) => QueryResult::Success(record.user.clone()),
            None => QueryResult::not_found(),
        }
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create_room(
        &self,
        creator_id: i64,
        name: &str,
        description: &str,
        max_users: i64,
    ) -> QueryResult<Room> {
        let mut state = self.state.lock().unwrap();
        state.next_room_id += 1;
        let room = Room {
            id: state.next_room_id,
            name: name.to_string(),
            description: description.to_string(),
            creator_id,
            max_users,
            is_active: true,
            created_time: now_string(),
        };
        state.rooms.push(room.clone());
        QueryResult::Success(room)
    }

    async fn delete_room(&self, id: i64) -> QueryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.rooms.retain(|r| r.id != id);
        QueryResult::Success(())
    }

    async fn set_status(&self, id: i64, active: bool) -> QueryResult<()> {
        self.update_room(id, |room| room.is_active = active)
    }

    async fn set_name(&self, id: i64, name: &str) -> QueryResult<()> {
        self.update_room(id, |room| room.name = name.to_string())
    }

    async fn set_description(&self, id: i64, description: &str) -> QueryResult<()> {
        self.update_room(id, |room| room.description = description.to_string())
    }

    async fn set_max_users(&self, id: i64, max_users: i64) -> QueryResult<()> {
        self.update_room(id, |room| room.max_users = max_users)
    }

    async fn all_rooms(&self) -> QueryResult<Vec<Room>> {
        let state = self.state.lock().unwrap();
        let mut rooms = state.rooms.clone();
        rooms.sort_by(|a, b| b.id.cmp(&a.id));
        QueryResult::Success(rooms)
    }

    async fn active_rooms(&self) -> QueryResult<Vec<Room>> {
        let state = self.state.lock().unwrap();
        let mut rooms: Vec<Room> = state.rooms.iter().filter(|r| r.is_active).cloned().collect();
        rooms.sort_by(|a, b| b.id.cmp(&a.id));
        QueryResult::Success(rooms)
    }

    async fn room_by_id(&self, id: i64) -> QueryResult<Room> {
        let state = self.state.lock().unwrap();
        match state.rooms.iter().find(|r| r.id == id) {
            Some(room) => QueryResult::Success(room.clone()),
            None => QueryResult::not_found(),
        }
    }
}

impl MemoryStore {
    fn update_room(&self, id: i64, apply: impl FnOnce(&mut Room)) -> QueryResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.rooms.iter_mut().find(|r| r.id == id) {
            Some(room) => {
                apply(room);
                QueryResult::Success(())
            }
            None => QueryResult::not_found(),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(
        &self,
        user_id: i64,
        room_id: i64,
        content: &str,
        display_name: &str,
        send_time: &str,
    ) -> QueryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.next_message_id += 1;
        let message = StoredMessage {
            id: state.next_message_id,
            user_id,
            room_id,
            content: content.to_string(),
            display_name: display_name.to_string(),
            send_time: send_time.to_string(),
        };
        state.messages.push(message);
        QueryResult::Success(())
    }

    async fn recent(&self, room_id: i64, limit: i64) -> QueryResult<Vec<StoredMessage>> {
        let state = self.state.lock().unwrap();
        let mut messages: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.send_time.cmp(&a.send_time).then(b.id.cmp(&a.id)));
        messages.truncate(limit.max(0) as usize);
        QueryResult::Success(messages)
    }

    async fn recent_by_user(
        &self,
        user_id: i64,
        room_id: i64,
        limit: i64,
    ) -> QueryResult<Vec<StoredMessage>> {
        let state = self.state.lock().unwrap();
        let mut messages: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.room_id == room_id && m.user_id == user_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.send_time.cmp(&a.send_time).then(b.id.cmp(&a.id)));
        messages.truncate(limit.max(0) as usize);
        QueryResult::Success(messages)
    }
}
