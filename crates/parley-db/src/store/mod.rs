//! Typed data-access operations.
//!
//! Capability traits with two implementations: [`mysql`] backed by the
//! gateway, and [`memory`] for tests and offline runs. Both share the
//! discriminator assignment policy and the `NotFound` sub-codes.

pub mod memory;
pub mod mysql;

use std::collections::HashSet;

use async_trait::async_trait;
use rand::Rng;

use parley_core::{Role, Room, StoredMessage, User};

use crate::result::QueryResult;

/// Default history window for recent-message queries.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// User account operations.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Register a user. The password arrives pre-hashed.
    ///
    /// `NotFound` sub-codes: [`crate::subcode::EMAIL_TAKEN`],
    /// [`crate::subcode::NAME_EXHAUSTED`].
    async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> QueryResult<User>;

    /// Check credentials and return the user on success.
    ///
    /// The stored hash is fetched with the user row in one statement,
    /// verified here, and never returned. Sub-code
    /// [`crate::subcode::WRONG_PASSWORD`] distinguishes a bad password
    /// from a missing account.
    async fn authenticate(&self, email: &str, password: &str) -> QueryResult<User>;

    async fn change_password(
        &self,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> QueryResult<()>;

    /// Rename a user, assigning a fresh discriminator under the new name.
    async fn change_display_name(&self, user_id: i64, name: &str) -> QueryResult<()>;

    async fn user_by_id(&self, id: i64) -> QueryResult<User>;

    async fn user_by_email(&self, email: &str) -> QueryResult<User>;

    async fn user_by_full_name(&self, name: &str, discriminator: &str) -> QueryResult<User>;
}

/// Room CRUD operations.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(
        &self,
        creator_id: i64,
        name: &str,
        description: &str,
        max_users: i64,
    ) -> QueryResult<Room>;

    async fn delete_room(&self, id: i64) -> QueryResult<()>;

    async fn set_status(&self, id: i64, active: bool) -> QueryResult<()>;

    async fn set_name(&self, id: i64, name: &str) -> QueryResult<()>;

    async fn set_description(&self, id: i64, description: &str) -> QueryResult<()>;

    async fn set_max_users(&self, id: i64, max_users: i64) -> QueryResult<()>;

    /// Every room, newest id first.
    async fn all_rooms(&self) -> QueryResult<Vec<Room>>;

    /// Active rooms only, newest id first.
    async fn active_rooms(&self) -> QueryResult<Vec<Room>>;

    async fn room_by_id(&self, id: i64) -> QueryResult<Room>;
}

/// Message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        user_id: i64,
        room_id: i64,
        content: &str,
        display_name: &str,
        send_time: &str,
    ) -> QueryResult<()>;

    /// Up to `limit` newest messages in the room.
    async fn recent(&self, room_id: i64, limit: i64) -> QueryResult<Vec<StoredMessage>>;

    /// Up to `limit` newest messages by one user in the room.
    async fn recent_by_user(
        &self,
        user_id: i64,
        room_id: i64,
        limit: i64,
    ) -> QueryResult<Vec<StoredMessage>>;
}

/// Pick an unused 4-digit discriminator.
///
/// Random draws keep the expected cost O(1) while the namespace is
/// roomy; past 9 900 occupants (or after 50 misses) a linear scan finds
/// the first free slot. `None` means all 10 000 are taken.
pub(crate) fn pick_discriminator(used: &HashSet<String>) -> Option<String> {
    if used.len() >= 10_000 {
        return None;
    }

    if used.len() < 9_900 {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let candidate = format!("{:04}", rng.gen_range(0..10_000));
            if !used.contains(&candidate) {
                return Some(candidate);
            }
        }
    }

    (0..10_000)
        .map(|n| format!("{n:04}"))
        .find(|candidate| !used.contains(candidate))
}
