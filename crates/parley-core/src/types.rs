//! Domain models persisted in the relational store.

use serde::{Deserialize, Serialize};

/// Privilege level of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Normal,
    Admin,
}

impl Role {
    /// Map from the textual `is_admin` column (`TRUE` / `FALSE`).
    pub fn from_db(value: &str) -> Self {
        if value.eq_ignore_ascii_case("true") || value == "1" {
            Role::Admin
        } else {
            Role::Normal
        }
    }

    /// Textual form stored in the `is_admin` column.
    pub fn to_db(self) -> &'static str {
        match self {
            Role::Admin => "TRUE",
            Role::Normal => "FALSE",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// A registered user account.
///
/// The password hash lives only in the data-access layer and is never
/// carried on this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Zero-padded 4-digit string disambiguating users sharing a name.
    pub discriminator: String,
    pub email: String,
    pub role: Role,
    pub created_time: String,
}

impl User {
    /// The globally unique `name#discriminator` form shown in chat.
    pub fn full_name(&self) -> String {
        format!("{}#{}", self.name, self.discriminator)
    }
}

/// A chat room row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub creator_id: i64,
    /// Member cap; 0 means unbounded.
    pub max_users: i64,
    pub is_active: bool,
    pub created_time: String,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: i64,
    pub room_id: i64,
    pub content: String,
    /// Snapshot of the sender's `name#discriminator` at send time.
    pub display_name: String,
    pub send_time: String,
}
