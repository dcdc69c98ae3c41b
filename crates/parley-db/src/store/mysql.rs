//! MySQL-backed stores.
//!
//! Statement shapes mirror the schema in §Persisted state: textual
//! `TRUE`/`FALSE` booleans, `NOW()` timestamps, and `LAST_INSERT_ID()`
//! to fetch freshly inserted rows inside the same transaction.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use parley_core::password;
use parley_core::{Role, Room, StoredMessage, User};

use crate::gateway::QueryGateway;
use crate::pool::PooledConn;
use crate::result::{ExecuteResult, QueryResult, SqlValue, subcode};
use crate::store::{MessageStore, RoomStore, UserStore, pick_discriminator};

const USER_COLUMNS: &str = "id, discriminator, name, email, is_admin, created_time";
const ROOM_COLUMNS: &str = "id, name, description, creator_id, max_users, is_active, created_time";
const MESSAGE_COLUMNS: &str = "message_id, user_id, room_id, content, display_name, send_time";

fn parse_i64(value: &str) -> Result<i64, ()> {
    value.trim().parse().map_err(|_| ())
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn user_from_row(row: &[String]) -> QueryResult<User> {
    let parsed = (|| -> Result<User, ()> {
        Ok(User {
            id: parse_i64(row.first().ok_or(())?)?,
            discriminator: row.get(1).ok_or(())?.clone(),
            name: row.get(2).ok_or(())?.clone(),
            email: row.get(3).ok_or(())?.clone(),
            role: Role::from_db(row.get(4).ok_or(())?),
            created_time: row.get(5).ok_or(())?.clone(),
        })
    })();
    match parsed {
        Ok(user) => QueryResult::Success(user),
        Err(()) => QueryResult::InternalError("malformed user row".to_string()),
    }
}

fn room_from_row(row: &[String]) -> QueryResult<Room> {
    let parsed = (|| -> Result<Room, ()> {
        Ok(Room {
            id: parse_i64(row.first().ok_or(())?)?,
            name: row.get(1).ok_or(())?.clone(),
            description: row.get(2).ok_or(())?.clone(),
            creator_id: parse_i64(row.get(3).ok_or(())?)?,
            max_users: parse_i64(row.get(4).ok_or(())?)?,
            is_active: parse_bool(row.get(5).ok_or(())?),
            created_time: row.get(6).ok_or(())?.clone(),
        })
    })();
    match parsed {
        Ok(room) => QueryResult::Success(room),
        Err(()) => QueryResult::InternalError("malformed room row".to_string()),
    }
}

fn message_from_row(row: &[String]) -> QueryResult<StoredMessage> {
    let parsed = (|| -> Result<StoredMessage, ()> {
        Ok(StoredMessage {
            id: parse_i64(row.first().ok_or(())?)?,
            user_id: parse_i64(row.get(1).ok_or(())?)?,
            room_id: parse_i64(row.get(2).ok_or(())?)?,
            content: row.get(3).ok_or(())?.clone(),
            display_name: row.get(4).ok_or(())?.clone(),
            send_time: row.get(5).ok_or(())?.clone(),
        })
    })();
    match parsed {
        Ok(message) => QueryResult::Success(message),
        Err(()) => QueryResult::InternalError("malformed message row".to_string()),
    }
}

/// Convert a single-row result through a row parser.
fn into_one<T>(
    result: QueryResult<ExecuteResult>,
    parse: fn(&[String]) -> QueryResult<T>,
) -> QueryResult<T> {
    match result {
        QueryResult::Success(ExecuteResult::Row(row)) => parse(&row),
        QueryResult::Success(_) => {
            QueryResult::InternalError("expected exactly one row".to_string())
        }
        other => other.cast_err(),
    }
}

/// Convert any result shape through a row parser; `NotFound` becomes an
/// empty list.
fn into_many<T>(
    result: QueryResult<ExecuteResult>,
    parse: fn(&[String]) -> QueryResult<T>,
) -> QueryResult<Vec<T>> {
    match result {
        QueryResult::Success(shape) => {
            let mut items = Vec::new();
            for row in shape.into_rows() {
                match parse(&row) {
                    QueryResult::Success(item) => items.push(item),
                    other => return other.cast_err(),
                }
            }
            QueryResult::Success(items)
        }
        QueryResult::NotFound(_) => QueryResult::Success(Vec::new()),
        other => other.cast_err(),
    }
}

/// Read the discriminators already taken by `name`, inside the caller's
/// transaction, and pick a free one.
///
/// `NotFound(NAME_EXHAUSTED)` when all 10 000 are in use.
async fn assign_discriminator(conn: &mut PooledConn, name: &str) -> QueryResult<String> {
    let taken = QueryGateway::execute_on(
        conn,
        "SELECT discriminator FROM users WHERE name = ?",
        &[SqlValue::from(name)],
    )
    .await;

    let used: HashSet<String> = match taken {
        QueryResult::Success(shape) => shape
            .into_rows()
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect(),
        QueryResult::NotFound(_) => HashSet::new(),
        other => return other.cast_err(),
    };

    match pick_discriminator(&used) {
        Some(discriminator) => QueryResult::Success(discriminator),
        None => QueryResult::not_found_with(subcode::NAME_EXHAUSTED),
    }
}

/// Fetch the row just inserted on this connection via `LAST_INSERT_ID()`.
async fn select_inserted(
    conn: &mut PooledConn,
    sql: &str,
) -> QueryResult<ExecuteResult> {
    let id = QueryGateway::execute_on(conn, "SELECT LAST_INSERT_ID()", &[]).await;
    let id = match id {
        QueryResult::Success(ExecuteResult::Row(row)) => match row.first().map(|v| parse_i64(v)) {
            Some(Ok(id)) => id,
            _ => return QueryResult::InternalError("no insert id returned".to_string()),
        },
        other => return other.cast_err(),
    };
    QueryGateway::execute_on(conn, sql, &[SqlValue::Int(id)]).await
}

// ── Users ────────────────────────────────────────────────────────────

pub struct MysqlUserStore {
    gateway: Arc<QueryGateway>,
}

impl MysqlUserStore {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl UserStore for MysqlUserStore {
    async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> QueryResult<User> {
        let name = name.to_string();
        let email = email.to_string();
        let password_hash = password_hash.to_string();

        let result = self
            .gateway
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let existing = QueryGateway::execute_on(
                        conn,
                        "SELECT id FROM users WHERE email = ?",
                        &[SqlValue::from(email.as_str())],
                    )
                    .await;
                    match existing {
                        QueryResult::NotFound(_) => {}
                        QueryResult::Success(_) => {
                            return QueryResult::not_found_with(subcode::EMAIL_TAKEN);
                        }
                        other => return other,
                    }

                    let discriminator = match assign_discriminator(conn, &name).await {
                        QueryResult::Success(discriminator) => discriminator,
                        other => return other.cast_err(),
                    };

                    let inserted = QueryGateway::execute_on(
                        conn,
                        "INSERT INTO users (discriminator, name, email, password_hash, \
                         is_admin, created_time) VALUES (?, ?, ?, ?, ?, NOW())",
                        &[
                            SqlValue::from(discriminator.as_str()),
                            SqlValue::from(name.as_str()),
                            SqlValue::from(email.as_str()),
                            SqlValue::from(password_hash.as_str()),
                            SqlValue::Bool(role.is_admin()),
                        ],
                    )
                    .await;
                    if !inserted.is_success() {
                        return inserted;
                    }

                    select_inserted(
                        conn,
                        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                    )
                    .await
                })
            })
            .await;

        into_one(result, user_from_row)
    }

    async fn authenticate(&self, email: &str, password: &str) -> QueryResult<User> {
        let result = self
            .gateway
            .execute(
                &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?"),
                &[SqlValue::from(email)],
            )
            .await;

        let row = match result {
            QueryResult::Success(ExecuteResult::Row(row)) => row,
            QueryResult::Success(_) => {
                return QueryResult::InternalError("expected exactly one row".to_string());
            }
            other => return other.cast_err(),
        };

        let Some(stored_hash) = row.get(6) else {
            return QueryResult::InternalError("malformed user row".to_string());
        };
        if !password::verify_password(password, stored_hash) {
            return QueryResult::not_found_with(subcode::WRONG_PASSWORD);
        }

        user_from_row(&row[..6])
    }

    async fn change_password(
        &self,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> QueryResult<()> {
        let email = email.to_string();
        let old_password = old_password.to_string();
        let new_password = new_password.to_string();

        let result = self
            .gateway
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let stored = QueryGateway::execute_on(
                        conn,
                        "SELECT password_hash FROM users WHERE email = ?",
                        &[SqlValue::from(email.as_str())],
                    )
                    .await;
                    let stored_hash = match stored {
                        QueryResult::Success(ExecuteResult::Row(row)) => {
                            row.into_iter().next().unwrap_or_default()
                        }
                        QueryResult::Success(_) => {
                            return QueryResult::InternalError(
                                "expected exactly one row".to_string(),
                            );
                        }
                        other => return other,
                    };

                    if !password::verify_password(&old_password, &stored_hash) {
                        return QueryResult::not_found_with(subcode::WRONG_PASSWORD);
                    }

                    let new_hash = password::hash_password(&new_password);
                    QueryGateway::execute_on(
                        conn,
                        "UPDATE users SET password_hash = ? WHERE email = ?",
                        &[SqlValue::from(new_hash), SqlValue::from(email.as_str())],
                    )
                    .await
                })
            })
            .await;

        result.map(|_| ())
    }

    async fn change_display_name(&self, user_id: i64, name: &str) -> QueryResult<()> {
        let name = name.to_string();

        let result = self
            .gateway
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let existing = QueryGateway::execute_on(
                        conn,
                        "SELECT id FROM users WHERE id = ?",
                        &[SqlValue::Int(user_id)],
                    )
                    .await;
                    if !existing.is_success() {
                        return existing;
                    }

                    let discriminator = match assign_discriminator(conn, &name).await {
                        QueryResult::Success(discriminator) => discriminator,
                        other => return other.cast_err(),
                    };

                    QueryGateway::execute_on(
                        conn,
                        "UPDATE users SET name = ?, discriminator = ? WHERE id = ?",
                        &[
                            SqlValue::from(name.as_str()),
                            SqlValue::from(discriminator.as_str()),
                            SqlValue::Int(user_id),
                        ],
                    )
                    .await
                })
            })
            .await;

        result.map(|_| ())
    }

    async fn user_by_id(&self, id: i64) -> QueryResult<User> {
        let result = self
            .gateway
            .execute(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                &[SqlValue::Int(id)],
            )
            .await;
        into_one(result, user_from_row)
    }

    async fn user_by_email(&self, email: &str) -> QueryResult<User> {
        let result = self
            .gateway
            .execute(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"),
                &[SqlValue::from(email)],
            )
            .await;
        into_one(result, user_from_row)
    }

    async fn user_by_full_name(&self, name: &str, discriminator: &str) -> QueryResult<User> {
        let result = self
            .gateway
            .execute(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE name = ? AND discriminator = ?"
                ),
                &[SqlValue::from(name), SqlValue::from(discriminator)],
            )
            .await;
        into_one(result, user_from_row)
    }
}

// ── Rooms ────────────────────────────────────────────────────────────

pub struct MysqlRoomStore {
    gateway: Arc<QueryGateway>,
}

impl MysqlRoomStore {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self { gateway }
    }

    async fn update(&self, sql: &str, args: &[SqlValue]) -> QueryResult<()> {
        self.gateway.execute(sql, args).await.map(|_| ())
    }
}

#[async_trait]
impl RoomStore for MysqlRoomStore {
    async fn create_room(
        &self,
        creator_id: i64,
        name: &str,
        description: &str,
        max_users: i64,
    ) -> QueryResult<Room> {
        let name = name.to_string();
        let description = description.to_string();

        let result = self
            .gateway
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let inserted = QueryGateway::execute_on(
                        conn,
                        "INSERT INTO rooms (name, description, creator_id, max_users, \
                         is_active, created_time) VALUES (?, ?, ?, ?, ?, NOW())",
                        &[
                            SqlValue::from(name.as_str()),
                            SqlValue::from(description.as_str()),
                            SqlValue::Int(creator_id),
                            SqlValue::Int(max_users),
                            SqlValue::Bool(true),
                        ],
                    )
                    .await;
                    if !inserted.is_success() {
                        return inserted;
                    }

                    select_inserted(
                        conn,
                        &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?"),
                    )
                    .await
                })
            })
            .await;

        into_one(result, room_from_row)
    }

    async fn delete_room(&self, id: i64) -> QueryResult<()> {
        self.update("DELETE FROM rooms WHERE id = ?", &[SqlValue::Int(id)])
            .await
    }

    async fn set_status(&self, id: i64, active: bool) -> QueryResult<()> {
        self.update(
            "UPDATE rooms SET is_active = ? WHERE id = ?",
            &[SqlValue::Bool(active), SqlValue::Int(id)],
        )
        .await
    }

    async fn set_name(&self, id: i64, name: &str) -> QueryResult<()> {
        self.update(
            "UPDATE rooms SET name = ? WHERE id = ?",
            &[SqlValue::from(name), SqlValue::Int(id)],
        )
        .await
    }

    async fn set_description(&self, id: i64, description: &str) -> QueryResult<()> {
        self.update(
            "UPDATE rooms SET description = ? WHERE id = ?",
            &[SqlValue::from(description), SqlValue::Int(id)],
        )
        .await
    }

    async fn set_max_users(&self, id: i64, max_users: i64) -> QueryResult<()> {
        self.update(
            "UPDATE rooms SET max_users = ? WHERE id = ?",
            &[SqlValue::Int(max_users), SqlValue::Int(id)],
        )
        .await
    }

    async fn all_rooms(&self) -> QueryResult<Vec<Room>> {
        let result = self
            .gateway
            .execute(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms ORDER BY id DESC"),
                &[],
            )
            .await;
        into_many(result, room_from_row)
    }

    async fn active_rooms(&self) -> QueryResult<Vec<Room>> {
        let result = self
            .gateway
            .execute(
                &format!(
                    "SELECT {ROOM_COLUMNS} FROM rooms WHERE is_active = TRUE ORDER BY id DESC"
                ),
                &[],
            )
            .await;
        into_many(result, room_from_row)
    }

    async fn room_by_id(&self, id: i64) -> QueryResult<Room> {
        let result = self
            .gateway
            .execute(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?"),
                &[SqlValue::Int(id)],
            )
            .await;
        into_one(result, room_from_row)
    }
}

// ── Messages ─────────────────────────────────────────────────────────

pub struct MysqlMessageStore {
    gateway: Arc<QueryGateway>,
}

impl MysqlMessageStore {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl MessageStore for MysqlMessageStore {
    async fn append(
        &self,
        user_id: i64,
        room_id: i64,
        content: &str,
        display_name: &str,
        send_time: &str,
    ) -> QueryResult<()> {
        self.gateway
            .execute(
                "INSERT INTO messages (user_id, room_id, content, display_name, send_time) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    SqlValue::Int(user_id),
                    SqlValue::Int(room_id),
                    SqlValue::from(content),
                    SqlValue::from(display_name),
                    SqlValue::from(send_time),
                ],
            )
            .await
            .map(|_| ())
    }

    async fn recent(&self, room_id: i64, limit: i64) -> QueryResult<Vec<StoredMessage>> {
        let result = self
            .gateway
            .execute(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ? \
                     ORDER BY send_time DESC, message_id DESC LIMIT ?"
                ),
                &[SqlValue::Int(room_id), SqlValue::Int(limit)],
            )
            .await;
        into_many(result, message_from_row)
    }

    async fn recent_by_user(
        &self,
        user_id: i64,
        room_id: i64,
        limit: i64,
    ) -> QueryResult<Vec<StoredMessage>> {
        let result = self
            .gateway
            .execute(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE user_id = ? AND room_id = ? \
                     ORDER BY send_time DESC, message_id DESC LIMIT ?"
                ),
                &[
                    SqlValue::Int(user_id),
                    SqlValue::Int(room_id),
                    SqlValue::Int(limit),
                ],
            )
            .await;
        into_many(result, message_from_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_row_parses() {
        let row: Vec<String> = ["7", "0042", "alice", "a@x", "FALSE", "2026-01-01 00:00:00"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let QueryResult::Success(user) = user_from_row(&row) else {
            panic!("expected success");
        };
        assert_eq!(user.id, 7);
        assert_eq!(user.discriminator, "0042");
        assert_eq!(user.role, Role::Normal);
    }

    #[test]
    fn malformed_rows_surface_internal_error() {
        let short: Vec<String> = vec!["7".into(), "0042".into()];
        assert!(matches!(
            user_from_row(&short),
            QueryResult::InternalError(_)
        ));

        let bad_id: Vec<String> = ["x", "n", "d", "e", "FALSE", "t"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(
            user_from_row(&bad_id),
            QueryResult::InternalError(_)
        ));
    }

    #[test]
    fn room_row_parses_booleans() {
        let row: Vec<String> = ["42", "lobby", "", "1", "10", "TRUE", "2026-01-01 00:00:00"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let QueryResult::Success(room) = room_from_row(&row) else {
            panic!("expected success");
        };
        assert!(room.is_active);
        assert_eq!(room.max_users, 10);
    }

    #[test]
    fn into_many_treats_not_found_as_empty() {
        let result = into_many(QueryResult::not_found(), room_from_row);
        assert_eq!(result, QueryResult::Success(Vec::new()));
    }
}
