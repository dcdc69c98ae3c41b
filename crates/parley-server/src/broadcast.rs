//! Fan-out notification engine.
//!
//! Member and connection snapshots are taken under their own locks,
//! released, and only then are frames enqueued — no registry lock is
//! held while touching connection queues.

use serde_json::Value;

use crate::conn::{ConnId, ConnectionMap};
use crate::registry::RoomRegistry;

/// Enqueue a push frame to every connected member of a room.
pub fn notify_room_users(
    registry: &RoomRegistry,
    connections: &ConnectionMap,
    room_id: i64,
    msg_type: u16,
    body: &Value,
) {
    let members = registry.members_of(room_id);
    let conns = registry.conns_for_users(&members);
    send_to_conns(connections, &conns, msg_type, body);
}

/// Enqueue a push frame to a specific set of users.
pub fn notify_users(
    registry: &RoomRegistry,
    connections: &ConnectionMap,
    user_ids: &[i64],
    msg_type: u16,
    body: &Value,
) {
    let conns = registry.conns_for_users(user_ids);
    send_to_conns(connections, &conns, msg_type, body);
}

fn send_to_conns(connections: &ConnectionMap, conns: &[ConnId], msg_type: u16, body: &Value) {
    let payload = body.to_string();
    for &conn in conns {
        connections.send_frame(conn, msg_type, payload.as_bytes());
    }
}
