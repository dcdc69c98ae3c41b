//! Per-message request handlers.
//!
//! Common shape: parse the JSON payload, check required fields,
//! validate the token where the operation demands one, call the
//! service, mutate the registry under its locks, then enqueue the
//! response and any pushes. Notification payloads are computed from
//! snapshots; no registry lock is held while frames are enqueued.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use parley_core::time::{epoch_millis, now_string};
use parley_proto::Frame;
use parley_proto::envelope::{error_body, ok_body};
use parley_proto::types::*;
use parley_service::{ErrorCode, ServiceResult};

use crate::broadcast::{notify_room_users, notify_users};
use crate::conn::ConnId;
use crate::registry::{JoinError, RoomSummary};
use crate::session::Access;
use crate::state::ServerState;

/// Maximum chat message length in characters.
const MAX_MESSAGE_CHARS: usize = 1000;

/// Kick delivery retries when the old connection's queue is saturated.
const KICK_RETRIES: usize = 10;
const KICK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Route one decoded frame to its handler.
pub async fn handle_request(state: &ServerState, conn_id: ConnId, frame: Frame) {
    let response_type = response_for(frame.msg_type);

    let Ok(body) = serde_json::from_slice::<Value>(&frame.payload) else {
        send_error(
            state,
            conn_id,
            response_type,
            ErrorCode::BadRequest,
            "malformed JSON payload",
        );
        return;
    };

    match frame.msg_type {
        MSG_REGISTER => register(state, conn_id, &body).await,
        MSG_CHANGE_PASSWORD => change_password(state, conn_id, &body).await,
        MSG_CHANGE_DISPLAY_NAME => change_display_name(state, conn_id, &body).await,
        MSG_LOGIN => login(state, conn_id, &body).await,
        MSG_LOGOUT => logout(state, conn_id, &body).await,
        MSG_FETCH_ACTIVE_ROOMS => fetch_rooms(state, conn_id, &body, false),
        MSG_FETCH_INACTIVE_ROOMS => fetch_rooms(state, conn_id, &body, true),
        MSG_CREATE_ROOM => create_room(state, conn_id, &body).await,
        MSG_DELETE_ROOM => delete_room(state, conn_id, &body).await,
        MSG_SET_ROOM_NAME => set_room_name(state, conn_id, &body).await,
        MSG_SET_ROOM_DESCRIPTION => set_room_description(state, conn_id, &body).await,
        MSG_SET_ROOM_MAX_USERS => set_room_max_users(state, conn_id, &body).await,
        MSG_SET_ROOM_STATUS => set_room_status(state, conn_id, &body).await,
        MSG_SEND_MESSAGE => send_message(state, conn_id, &body).await,
        MSG_GET_MESSAGE_HISTORY => get_message_history(state, conn_id, &body).await,
        MSG_JOIN_ROOM => join_room(state, conn_id, &body),
        MSG_LEAVE_ROOM => leave_room(state, conn_id, &body),
        MSG_GET_USER_INFO => get_user_info(state, conn_id, &body).await,
        other => {
            debug!(conn = conn_id, msg_type = other, "unroutable message type");
            send_error(
                state,
                conn_id,
                MSG_ERROR_RESPONSE,
                ErrorCode::BadRequest,
                "unknown message type",
            );
        }
    }
}

/// Tear down one connection end to end: drop it from the map, strip
/// identity and membership, revoke the session unless a newer
/// connection took the user over, and tell the room. Idempotent.
pub fn cleanup_connection(state: &ServerState, conn_id: ConnId) {
    let removed = state.connections.remove(conn_id);
    let outcome = state.registry.cleanup_conn(conn_id);

    if let Some(user_id) = outcome.user_id {
        // On kick the user is already bound to the replacement
        // connection; its fresh token must survive this teardown.
        if state.registry.conn_for_user(user_id).is_none() {
            state.sessions.revoke(user_id);
        }

        if let Some(room_id) = outcome.room_id {
            notify_room_users(
                &state.registry,
                &state.connections,
                room_id,
                MSG_USER_LEAVE_PUSH,
                &json!({ "user_id": user_id, "room_id": room_id }),
            );
        }
    }

    if removed {
        debug!(conn = conn_id, user = ?outcome.user_id, "connection cleaned up");
    }
}

// ── Envelope helpers ─────────────────────────────────────────────────

fn send_error(
    state: &ServerState,
    conn_id: ConnId,
    response_type: u16,
    code: ErrorCode,
    message: &str,
) {
    let body = error_body(response_type, code.as_i64(), message);
    state.connections.send_json(conn_id, response_type, &body);
}

fn send_result<T>(
    state: &ServerState,
    conn_id: ConnId,
    response_type: u16,
    result: &ServiceResult<T>,
) {
    let body = json!({
        "type": response_type,
        "success": result.is_ok(),
        "code": result.code.as_i64(),
        "message": result.message,
    });
    state.connections.send_json(conn_id, response_type, &body);
}

fn field_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

fn field_i64(body: &Value, key: &str) -> Option<i64> {
    body.get(key).and_then(Value::as_i64)
}

/// Resolve the connection's user and validate the presented token.
///
/// Sends the error response itself on failure.
fn authed_user(
    state: &ServerState,
    conn_id: ConnId,
    body: &Value,
    response_type: u16,
    admin_only: bool,
) -> Option<(i64, Access)> {
    let Some(token) = field_str(body, "token") else {
        send_error(
            state,
            conn_id,
            response_type,
            ErrorCode::BadRequest,
            "missing required fields",
        );
        return None;
    };

    let access = match state.registry.user_for_conn(conn_id) {
        Some(user_id) => state.sessions.validate(user_id, token),
        None => Access::Invalid,
    };

    match access {
        Access::Invalid => {
            send_error(
                state,
                conn_id,
                response_type,
                ErrorCode::Unauthorized,
                "Token invalid or expired",
            );
            None
        }
        Access::Normal if admin_only => {
            send_error(
                state,
                conn_id,
                response_type,
                ErrorCode::Forbidden,
                "admin required",
            );
            None
        }
        access => {
            // user_for_conn succeeded or validate would have failed.
            let user_id = state.registry.user_for_conn(conn_id)?;
            Some((user_id, access))
        }
    }
}

fn missing_fields(state: &ServerState, conn_id: ConnId, response_type: u16) {
    send_error(
        state,
        conn_id,
        response_type,
        ErrorCode::BadRequest,
        "missing required fields",
    );
}

fn room_summary_json(summary: &RoomSummary) -> Value {
    json!({
        "id": summary.id,
        "name": summary.name,
        "description": summary.description,
        "creator_id": summary.creator_id,
        "max_users": summary.max_users,
        "current_users": summary.current_users,
        "created_time": summary.created_time,
    })
}

// ── Account handlers ─────────────────────────────────────────────────

async fn register(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(email), Some(password), Some(name)) = (
        field_str(body, "email"),
        field_str(body, "password"),
        field_str(body, "name"),
    ) else {
        return missing_fields(state, conn_id, MSG_REGISTER_RESPONSE);
    };

    let result = state.services.user.register(email, password, name).await;
    send_result(state, conn_id, MSG_REGISTER_RESPONSE, &result);
}

async fn change_password(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(email), Some(old_password), Some(new_password)) = (
        field_str(body, "email"),
        field_str(body, "old_password"),
        field_str(body, "new_password"),
    ) else {
        return missing_fields(state, conn_id, MSG_CHANGE_PASSWORD_RESPONSE);
    };

    let result = state
        .services
        .user
        .change_password(email, old_password, new_password)
        .await;
    send_result(state, conn_id, MSG_CHANGE_PASSWORD_RESPONSE, &result);
}

async fn change_display_name(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some(display_name) = field_str(body, "display_name") else {
        return missing_fields(state, conn_id, MSG_CHANGE_DISPLAY_NAME_RESPONSE);
    };
    let Some((user_id, _)) =
        authed_user(state, conn_id, body, MSG_CHANGE_DISPLAY_NAME_RESPONSE, false)
    else {
        return;
    };

    let result = state
        .services
        .user
        .change_display_name(user_id, display_name)
        .await;
    send_result(state, conn_id, MSG_CHANGE_DISPLAY_NAME_RESPONSE, &result);
}

async fn login(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(email), Some(password)) =
        (field_str(body, "email"), field_str(body, "password"))
    else {
        return missing_fields(state, conn_id, MSG_LOGIN_RESPONSE);
    };

    let result = state.services.user.login(email, password).await;
    let Some(login) = result.data.as_ref() else {
        return send_result(state, conn_id, MSG_LOGIN_RESPONSE, &result);
    };
    let user = &login.user;

    // An existing session for this user gets a kick frame (best-effort
    // when its queue is saturated) and a full teardown before the new
    // token exists.
    if let Some(old_conn) = state.registry.previous_conn_for(user.id, conn_id) {
        for attempt in 0..KICK_RETRIES {
            if !state.connections.contains(old_conn) {
                break;
            }
            if state.connections.send_frame(old_conn, MSG_ACCOUNT_KICKED, b"") {
                break;
            }
            if attempt + 1 < KICK_RETRIES {
                tokio::time::sleep(KICK_RETRY_DELAY).await;
            }
        }
        cleanup_connection(state, old_conn);
        debug!(user = user.id, old_conn, "previous session kicked");
    }

    state.registry.bind_identity(conn_id, user.id);
    let token = state.sessions.issue(user.id, login.is_admin);

    let mut response = json!({
        "type": MSG_LOGIN_RESPONSE,
        "success": true,
        "code": ErrorCode::Success.as_i64(),
        "message": result.message,
        "token": token,
        "user": {
            "id": user.id,
            "discriminator": user.discriminator,
            "name": user.name,
            "email": user.email,
            "is_admin": login.is_admin,
            "created_time": user.created_time,
        },
        "active_rooms": state
            .registry
            .active_summaries()
            .iter()
            .map(room_summary_json)
            .collect::<Vec<_>>(),
    });
    if login.is_admin {
        response["inactive_rooms"] = Value::Array(
            state
                .registry
                .inactive_summaries()
                .iter()
                .map(room_summary_json)
                .collect(),
        );
    }

    state
        .connections
        .send_json(conn_id, MSG_LOGIN_RESPONSE, &response);
}

async fn logout(state: &ServerState, conn_id: ConnId, body: &Value) {
    if authed_user(state, conn_id, body, MSG_LOGOUT_RESPONSE, false).is_none() {
        return;
    }
    // Logging out is a self-kick: the teardown is the response.
    cleanup_connection(state, conn_id);
}

// ── Room listing handlers ────────────────────────────────────────────

fn fetch_rooms(state: &ServerState, conn_id: ConnId, body: &Value, inactive: bool) {
    let response_type = if inactive {
        MSG_FETCH_INACTIVE_ROOMS_RESPONSE
    } else {
        MSG_FETCH_ACTIVE_ROOMS_RESPONSE
    };
    if authed_user(state, conn_id, body, response_type, inactive).is_none() {
        return;
    }

    let summaries = if inactive {
        state.registry.inactive_summaries()
    } else {
        state.registry.active_summaries()
    };
    let body = json!({
        "type": response_type,
        "success": true,
        "code": ErrorCode::Success.as_i64(),
        "rooms": summaries.iter().map(room_summary_json).collect::<Vec<_>>(),
    });
    state.connections.send_json(conn_id, response_type, &body);
}

// ── Room admin handlers ──────────────────────────────────────────────

async fn create_room(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(name), Some(description), Some(max_users)) = (
        field_str(body, "name"),
        field_str(body, "description"),
        field_i64(body, "max_users"),
    ) else {
        return missing_fields(state, conn_id, MSG_CREATE_ROOM_RESPONSE);
    };
    let Some((admin_id, _)) = authed_user(state, conn_id, body, MSG_CREATE_ROOM_RESPONSE, true)
    else {
        return;
    };

    let result = state
        .services
        .admin
        .create_room(admin_id, name, description, max_users)
        .await;

    match result.data.as_ref() {
        Some(room) => {
            state.registry.insert_room(room);
            let body = json!({
                "type": MSG_CREATE_ROOM_RESPONSE,
                "success": true,
                "code": ErrorCode::Success.as_i64(),
                "room": {
                    "id": room.id,
                    "name": room.name,
                    "description": room.description,
                    "creator_id": room.creator_id,
                    "max_users": room.max_users,
                    "current_users": 0,
                    "created_time": room.created_time,
                },
            });
            state
                .connections
                .send_json(conn_id, MSG_CREATE_ROOM_RESPONSE, &body);
        }
        None => send_result(state, conn_id, MSG_CREATE_ROOM_RESPONSE, &result),
    }
}

async fn delete_room(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some(room_id) = field_i64(body, "room_id") else {
        return missing_fields(state, conn_id, MSG_DELETE_ROOM_RESPONSE);
    };
    if authed_user(state, conn_id, body, MSG_DELETE_ROOM_RESPONSE, true).is_none() {
        return;
    }

    let result = state.services.admin.delete_room(room_id).await;
    if result.is_ok() {
        let members = state.registry.remove_room(room_id);
        if !members.is_empty() {
            notify_users(
                &state.registry,
                &state.connections,
                &members,
                MSG_SYSTEM_MESSAGE_PUSH,
                &json!({ "room_id": room_id, "message": "room deleted" }),
            );
        }
    }
    send_result(state, conn_id, MSG_DELETE_ROOM_RESPONSE, &result);
}

async fn set_room_name(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(room_id), Some(name)) = (field_i64(body, "room_id"), field_str(body, "name"))
    else {
        return missing_fields(state, conn_id, MSG_SET_ROOM_NAME_RESPONSE);
    };
    if authed_user(state, conn_id, body, MSG_SET_ROOM_NAME_RESPONSE, true).is_none() {
        return;
    }

    let result = state.services.admin.set_room_name(room_id, name).await;
    if result.is_ok() {
        let name = name.to_string();
        state.registry.update_room(room_id, |room| room.name = name.clone());
        notify_room_users(
            &state.registry,
            &state.connections,
            room_id,
            MSG_ROOM_NAME_UPDATE_PUSH,
            &json!({ "room_id": room_id, "name": name }),
        );
    }
    send_result(state, conn_id, MSG_SET_ROOM_NAME_RESPONSE, &result);
}

async fn set_room_description(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(room_id), Some(description)) =
        (field_i64(body, "room_id"), field_str(body, "description"))
    else {
        return missing_fields(state, conn_id, MSG_SET_ROOM_DESCRIPTION_RESPONSE);
    };
    if authed_user(state, conn_id, body, MSG_SET_ROOM_DESCRIPTION_RESPONSE, true).is_none() {
        return;
    }

    let result = state
        .services
        .admin
        .set_room_description(room_id, description)
        .await;
    if result.is_ok() {
        let description = description.to_string();
        state
            .registry
            .update_room(room_id, |room| room.description = description.clone());
        notify_room_users(
            &state.registry,
            &state.connections,
            room_id,
            MSG_ROOM_DESCRIPTION_UPDATE_PUSH,
            &json!({ "room_id": room_id, "description": description }),
        );
    }
    send_result(state, conn_id, MSG_SET_ROOM_DESCRIPTION_RESPONSE, &result);
}

async fn set_room_max_users(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(room_id), Some(max_users)) =
        (field_i64(body, "room_id"), field_i64(body, "max_users"))
    else {
        return missing_fields(state, conn_id, MSG_SET_ROOM_MAX_USERS_RESPONSE);
    };
    if authed_user(state, conn_id, body, MSG_SET_ROOM_MAX_USERS_RESPONSE, true).is_none() {
        return;
    }

    let result = state
        .services
        .admin
        .set_room_max_users(room_id, max_users)
        .await;
    if result.is_ok() {
        state
            .registry
            .update_room(room_id, |room| room.max_users = max_users);
        notify_room_users(
            &state.registry,
            &state.connections,
            room_id,
            MSG_ROOM_MAX_USERS_UPDATE_PUSH,
            &json!({ "room_id": room_id, "max_users": max_users }),
        );
    }
    send_result(state, conn_id, MSG_SET_ROOM_MAX_USERS_RESPONSE, &result);
}

async fn set_room_status(state: &ServerState, conn_id: ConnId, body: &Value) {
    let (Some(room_id), Some(status)) =
        (field_i64(body, "room_id"), field_i64(body, "status"))
    else {
        return missing_fields(state, conn_id, MSG_SET_ROOM_STATUS_RESPONSE);
    };
    if authed_user(state, conn_id, body, MSG_SET_ROOM_STATUS_RESPONSE, true).is_none() {
        return;
    }
    let activate = status != 0;

    let result = state.services.admin.set_room_status(room_id, activate).await;
    if result.is_ok() {
        if activate {
            state.registry.activate_room(room_id);
        } else if let Some(evicted) = state.registry.deactivate_room(room_id) {
            // Evicted members lost their user→room entry; tell them
            // directly since the member set is already empty.
            if !evicted.is_empty() {
                notify_users(
                    &state.registry,
                    &state.connections,
                    &evicted,
                    MSG_ROOM_STATUS_CHANGE_PUSH,
                    &json!({ "room_id": room_id, "is_active": false }),
                );
            }
        }
    }
    send_result(state, conn_id, MSG_SET_ROOM_STATUS_RESPONSE, &result);
}

// ── Chat handlers ────────────────────────────────────────────────────

async fn send_message(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some(message) = field_str(body, "message") else {
        return missing_fields(state, conn_id, MSG_SEND_MESSAGE_RESPONSE);
    };
    let Some((user_id, _)) = authed_user(state, conn_id, body, MSG_SEND_MESSAGE_RESPONSE, false)
    else {
        return;
    };

    if message.is_empty() {
        return send_error(
            state,
            conn_id,
            MSG_SEND_MESSAGE_RESPONSE,
            ErrorCode::BadRequest,
            "message content required",
        );
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return send_error(
            state,
            conn_id,
            MSG_SEND_MESSAGE_RESPONSE,
            ErrorCode::BadRequest,
            "message too long",
        );
    }

    let Some(room_id) = state.registry.room_of_user(user_id) else {
        return send_error(
            state,
            conn_id,
            MSG_SEND_MESSAGE_RESPONSE,
            ErrorCode::BadRequest,
            "not in a room",
        );
    };

    // The display name is rebuilt from the user record; clients cannot
    // spoof it.
    let user = state.services.user.get_user_info(user_id).await;
    let Some(user) = user.data.as_ref() else {
        return send_result(state, conn_id, MSG_SEND_MESSAGE_RESPONSE, &user);
    };
    let display_name = user.full_name();

    let result = state
        .services
        .chat
        .send_message(user_id, room_id, message, &display_name, &now_string())
        .await;
    if !result.is_ok() {
        return send_result(state, conn_id, MSG_SEND_MESSAGE_RESPONSE, &result);
    }

    notify_room_users(
        &state.registry,
        &state.connections,
        room_id,
        MSG_CHAT_MESSAGE_PUSH,
        &json!({
            "display_name": display_name,
            "message": message,
            "timestamp": epoch_millis(),
        }),
    );
    send_result(state, conn_id, MSG_SEND_MESSAGE_RESPONSE, &result);
}

async fn get_message_history(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some((user_id, _)) =
        authed_user(state, conn_id, body, MSG_GET_MESSAGE_HISTORY_RESPONSE, false)
    else {
        return;
    };
    let Some(room_id) = state.registry.room_of_user(user_id) else {
        return send_error(
            state,
            conn_id,
            MSG_GET_MESSAGE_HISTORY_RESPONSE,
            ErrorCode::BadRequest,
            "not in a room",
        );
    };

    let result = state
        .services
        .chat
        .get_message_history(room_id, field_i64(body, "max_count"))
        .await;
    match result.data.as_ref() {
        Some(messages) => {
            let body = json!({
                "type": MSG_GET_MESSAGE_HISTORY_RESPONSE,
                "success": true,
                "code": ErrorCode::Success.as_i64(),
                "messages": messages,
            });
            state
                .connections
                .send_json(conn_id, MSG_GET_MESSAGE_HISTORY_RESPONSE, &body);
        }
        None => send_result(state, conn_id, MSG_GET_MESSAGE_HISTORY_RESPONSE, &result),
    }
}

fn join_room(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some(room_id) = field_i64(body, "room_id") else {
        return missing_fields(state, conn_id, MSG_JOIN_ROOM_RESPONSE);
    };
    let Some((user_id, _)) = authed_user(state, conn_id, body, MSG_JOIN_ROOM_RESPONSE, false)
    else {
        return;
    };

    match state.registry.join_room(user_id, room_id) {
        Ok(()) => {
            notify_room_users(
                &state.registry,
                &state.connections,
                room_id,
                MSG_USER_JOIN_PUSH,
                &json!({ "user_id": user_id, "room_id": room_id }),
            );
            let mut body = ok_body(MSG_JOIN_ROOM_RESPONSE);
            body["room_id"] = json!(room_id);
            state
                .connections
                .send_json(conn_id, MSG_JOIN_ROOM_RESPONSE, &body);
        }
        Err(error) => {
            let code = match error {
                JoinError::RoomNotFound => ErrorCode::NotFound,
                JoinError::AlreadyInRoom | JoinError::RoomFull => ErrorCode::BadRequest,
            };
            send_error(
                state,
                conn_id,
                MSG_JOIN_ROOM_RESPONSE,
                code,
                &error.to_string(),
            );
        }
    }
}

fn leave_room(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some((user_id, _)) = authed_user(state, conn_id, body, MSG_LEAVE_ROOM_RESPONSE, false)
    else {
        return;
    };

    let Some(room_id) = state.registry.leave_room(user_id) else {
        return send_error(
            state,
            conn_id,
            MSG_LEAVE_ROOM_RESPONSE,
            ErrorCode::BadRequest,
            "not in a room",
        );
    };

    notify_room_users(
        &state.registry,
        &state.connections,
        room_id,
        MSG_USER_LEAVE_PUSH,
        &json!({ "user_id": user_id, "room_id": room_id }),
    );
    state
        .connections
        .send_json(conn_id, MSG_LEAVE_ROOM_RESPONSE, &ok_body(MSG_LEAVE_ROOM_RESPONSE));
}

async fn get_user_info(state: &ServerState, conn_id: ConnId, body: &Value) {
    let Some(target) = field_i64(body, "user_id") else {
        return missing_fields(state, conn_id, MSG_GET_USER_INFO_RESPONSE);
    };
    if authed_user(state, conn_id, body, MSG_GET_USER_INFO_RESPONSE, false).is_none() {
        return;
    }

    let result = state.services.user.get_user_info(target).await;
    match result.data.as_ref() {
        Some(user) => {
            let body = json!({
                "type": MSG_GET_USER_INFO_RESPONSE,
                "success": true,
                "code": ErrorCode::Success.as_i64(),
                "user": {
                    "id": user.id,
                    "name": user.name,
                    "discriminator": user.discriminator,
                    "is_admin": user.role.is_admin(),
                    "created_time": user.created_time,
                },
            });
            state
                .connections
                .send_json(conn_id, MSG_GET_USER_INFO_RESPONSE, &body);
        }
        None => send_result(state, conn_id, MSG_GET_USER_INFO_RESPONSE, &result),
    }
}
