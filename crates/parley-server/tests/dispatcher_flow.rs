//! End-to-end handler flows over the in-memory stores.
//!
//! Drives the dispatcher exactly as the worker pool would, with fake
//! connections attached to the connection map, and asserts on the
//! frames that come out the other side. Pushes are enqueued before the
//! caller's own response, mirroring the notify-then-respond handler
//! shape.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use parley_core::{Role, ServerConfig};
use parley_db::store::memory::MemoryStore;
use parley_proto::Frame;
use parley_proto::types::*;
use parley_server::dispatcher::{cleanup_connection, handle_request};
use parley_server::state::ServerState;
use parley_service::Services;

struct Harness {
    state: Arc<ServerState>,
    store: Arc<MemoryStore>,
}

struct Client {
    id: u64,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Client {
    /// Decode the next pending outbound frame into (type, body).
    fn next_frame(&mut self) -> (u16, Value) {
        let raw = self.rx.try_recv().expect("expected a frame in the outbox");
        assert!(raw.len() >= 4, "short frame");
        let msg_type = u16::from_be_bytes([raw[0], raw[1]]);
        let len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        assert_eq!(raw.len(), 4 + len, "frame length mismatch");
        let body = if len == 0 {
            Value::Null
        } else {
            serde_json::from_slice(&raw[4..]).expect("payload is JSON")
        };
        (msg_type, body)
    }

    fn outbox_is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn config(token_expire: Duration) -> ServerConfig {
    ServerConfig {
        port: 0,
        worker_count: 2,
        poll_timeout: Duration::from_millis(1000),
        max_read_buffer: 1024 * 1024,
        max_write_buffer: 1024 * 1024,
        token_expire,
        cleanup_interval: Duration::from_secs(600),
    }
}

fn harness_with(token_expire: Duration) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let services = Services::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
    );
    Harness {
        state: Arc::new(ServerState::new(config(token_expire), services)),
        store,
    }
}

fn harness() -> Harness {
    harness_with(Duration::from_secs(1800))
}

impl Harness {
    fn connect(&self, id: u64) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        self.state
            .connections
            .insert(id, tx, Arc::new(AtomicUsize::new(0)), shutdown);
        Client { id, rx }
    }

    async fn request(&self, client: &Client, msg_type: u16, body: Value) {
        let frame = Frame {
            msg_type,
            payload: Bytes::from(body.to_string().into_bytes()),
        };
        handle_request(&self.state, client.id, frame).await;
    }

    async fn register_and_login(
        &self,
        client: &mut Client,
        email: &str,
        name: &str,
    ) -> (String, Value) {
        self.request(
            client,
            MSG_REGISTER,
            json!({"email": email, "password": "pw1", "name": name}),
        )
        .await;
        let (_, registered) = client.next_frame();
        assert_eq!(registered["success"], true, "register failed: {registered}");

        self.request(client, MSG_LOGIN, json!({"email": email, "password": "pw1"}))
            .await;
        let (msg_type, response) = client.next_frame();
        assert_eq!(msg_type, MSG_LOGIN_RESPONSE);
        assert_eq!(response["success"], true, "login failed: {response}");
        (response["token"].as_str().unwrap().to_string(), response)
    }

    /// Seed an admin, log it in, and create one room; returns the admin
    /// client, its token, and the room id.
    async fn admin_with_room(&self, conn_id: u64, max_users: i64) -> (Client, String, i64) {
        let mut admin = self.connect(conn_id);
        self.store.seed_user("root", "root@x", "pw1", Role::Admin);
        self.request(
            &admin,
            MSG_LOGIN,
            json!({"email": "root@x", "password": "pw1"}),
        )
        .await;
        let (_, login) = admin.next_frame();
        let token = login["token"].as_str().unwrap().to_string();
        assert!(token.starts_with("a_"), "admin tokens lead with a_");

        self.request(
            &admin,
            MSG_CREATE_ROOM,
            json!({"token": token, "name": "lobby", "description": "", "max_users": max_users}),
        )
        .await;
        let (_, created) = admin.next_frame();
        assert_eq!(created["success"], true, "room creation failed: {created}");
        let room_id = created["room"]["id"].as_i64().unwrap();
        (admin, token, room_id)
    }
}

#[tokio::test]
async fn register_and_login_issue_normal_token() {
    let h = harness();
    let mut c1 = h.connect(1);

    let (token, response) = h.register_and_login(&mut c1, "a@x", "alice").await;
    assert!(token.starts_with("n_"), "normal tokens lead with n_: {token}");

    let discriminator = response["user"]["discriminator"].as_str().unwrap();
    assert_eq!(discriminator.len(), 4);
    assert!(discriminator.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(response["user"]["email"], "a@x");
    assert_eq!(response["user"]["is_admin"], false);
    assert!(response["active_rooms"].is_array());
    assert!(
        response.get("inactive_rooms").is_none(),
        "normal users see no inactive rooms"
    );
}

#[tokio::test]
async fn relogin_kicks_the_older_session() {
    let h = harness();
    let mut c1 = h.connect(1);
    let mut c2 = h.connect(2);

    h.register_and_login(&mut c1, "a@x", "alice").await;

    // Same account logs in on a second connection.
    h.request(&c2, MSG_LOGIN, json!({"email": "a@x", "password": "pw1"}))
        .await;

    // C1 receives the zero-length kick frame and is gone from the map.
    let (kick_type, kick_body) = c1.next_frame();
    assert_eq!(kick_type, MSG_ACCOUNT_KICKED);
    assert_eq!(kick_body, Value::Null);
    assert!(!h.state.connections.contains(1));

    // C2 holds the only token and the identity binding.
    let (_, login2) = c2.next_frame();
    assert_eq!(login2["success"], true);
    assert_eq!(h.state.sessions.len(), 1);
    let user_id = login2["user"]["id"].as_i64().unwrap();
    assert_eq!(h.state.registry.conn_for_user(user_id), Some(2));
}

#[tokio::test]
async fn join_send_broadcast_reaches_exactly_the_room() {
    let h = harness();
    let (_admin, _token, room_id) = h.admin_with_room(10, 10).await;

    let mut c1 = h.connect(1);
    let mut c2 = h.connect(2);
    let mut c3 = h.connect(3);
    let (t1, login1) = h.register_and_login(&mut c1, "a@x", "alice").await;
    let (t2, _) = h.register_and_login(&mut c2, "b@x", "bob").await;
    h.register_and_login(&mut c3, "c@x", "carol").await;

    h.request(&c1, MSG_JOIN_ROOM, json!({"token": t1, "room_id": room_id}))
        .await;
    // Joiner hears their own join push, then the response.
    let (push_type, _) = c1.next_frame();
    assert_eq!(push_type, MSG_USER_JOIN_PUSH);
    let (_, joined1) = c1.next_frame();
    assert_eq!(joined1["type"], MSG_JOIN_ROOM_RESPONSE as i64);
    assert_eq!(joined1["success"], true);

    h.request(&c2, MSG_JOIN_ROOM, json!({"token": t2, "room_id": room_id}))
        .await;
    let (push_type, join_push) = c2.next_frame();
    assert_eq!(push_type, MSG_USER_JOIN_PUSH);
    assert_eq!(join_push["room_id"], room_id);
    let (_, joined2) = c2.next_frame();
    assert_eq!(joined2["success"], true);
    // C1 sees bob arrive.
    let (push_type, _) = c1.next_frame();
    assert_eq!(push_type, MSG_USER_JOIN_PUSH);

    // C3 stays outside and must hear nothing.
    h.request(&c1, MSG_SEND_MESSAGE, json!({"token": t1, "message": "hello"}))
        .await;

    let expected_name = format!(
        "alice#{}",
        login1["user"]["discriminator"].as_str().unwrap()
    );
    for client in [&mut c1, &mut c2] {
        let (push_type, push) = client.next_frame();
        assert_eq!(push_type, MSG_CHAT_MESSAGE_PUSH);
        assert_eq!(push["display_name"], expected_name.as_str());
        assert_eq!(push["message"], "hello");
        assert!(push["timestamp"].is_i64());
    }
    let (_, send_response) = c1.next_frame();
    assert_eq!(send_response["success"], true);

    assert!(c3.outbox_is_empty(), "non-member received traffic");
    assert_eq!(h.store.message_count(), 1);
}

#[tokio::test]
async fn deactivation_evicts_members_and_blocks_rejoin() {
    let h = harness();
    let (mut admin, admin_token, room_id) = h.admin_with_room(10, 0).await;

    let mut c1 = h.connect(1);
    let (t1, login1) = h.register_and_login(&mut c1, "a@x", "alice").await;
    let user1 = login1["user"]["id"].as_i64().unwrap();
    h.request(&c1, MSG_JOIN_ROOM, json!({"token": t1, "room_id": room_id}))
        .await;
    let _ = c1.next_frame(); // join push
    let _ = c1.next_frame(); // join response

    h.request(
        &admin,
        MSG_SET_ROOM_STATUS,
        json!({"token": admin_token, "room_id": room_id, "status": 0}),
    )
    .await;

    // Evicted member gets the status push and loses the room binding.
    let (push_type, push) = c1.next_frame();
    assert_eq!(push_type, MSG_ROOM_STATUS_CHANGE_PUSH);
    assert_eq!(push["is_active"], false);
    assert_eq!(h.state.registry.room_of_user(user1), None);

    let (_, status_response) = admin.next_frame();
    assert_eq!(status_response["success"], true);

    // The room now lives on the inactive side only.
    assert!(!h.state.registry.is_active_room(room_id));

    // A fresh join attempt fails as not-found.
    h.request(&c1, MSG_JOIN_ROOM, json!({"token": t1, "room_id": room_id}))
        .await;
    let (_, rejoin) = c1.next_frame();
    assert_eq!(rejoin["success"], false);
    assert_eq!(rejoin["message"], "room not found");
}

#[tokio::test]
async fn expired_token_is_rejected_without_sweeper() {
    let h = harness_with(Duration::from_secs(0));
    let mut c1 = h.connect(1);
    let (token, _) = h.register_and_login(&mut c1, "a@x", "alice").await;

    h.request(&c1, MSG_FETCH_ACTIVE_ROOMS, json!({"token": token}))
        .await;
    let (_, response) = c1.next_frame();
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], 401);

    // The entry is still in the table; only validation rejected it.
    assert_eq!(h.state.sessions.len(), 1);
}

#[tokio::test]
async fn inactive_listing_requires_admin() {
    let h = harness();
    let mut c1 = h.connect(1);
    let (token, _) = h.register_and_login(&mut c1, "a@x", "alice").await;

    h.request(&c1, MSG_FETCH_INACTIVE_ROOMS, json!({"token": token}))
        .await;
    let (_, response) = c1.next_frame();
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], 403);
    assert_eq!(response["message"], "admin required");
}

#[tokio::test]
async fn oversize_and_roomless_messages_are_bad_requests() {
    let h = harness();
    let mut c1 = h.connect(1);
    let (token, _) = h.register_and_login(&mut c1, "a@x", "alice").await;

    let long = "x".repeat(1001);
    h.request(&c1, MSG_SEND_MESSAGE, json!({"token": token, "message": long}))
        .await;
    let (_, response) = c1.next_frame();
    assert_eq!(response["code"], 400);
    assert_eq!(response["message"], "message too long");

    h.request(&c1, MSG_SEND_MESSAGE, json!({"token": token, "message": "hi"}))
        .await;
    let (_, response) = c1.next_frame();
    assert_eq!(response["code"], 400);
    assert_eq!(response["message"], "not in a room");
}

#[tokio::test]
async fn full_room_refuses_joins() {
    let h = harness();
    let (_admin, _token, room_id) = h.admin_with_room(10, 1).await;

    let mut c1 = h.connect(1);
    let mut c2 = h.connect(2);
    let (t1, _) = h.register_and_login(&mut c1, "a@x", "alice").await;
    let (t2, _) = h.register_and_login(&mut c2, "b@x", "bob").await;

    h.request(&c1, MSG_JOIN_ROOM, json!({"token": t1, "room_id": room_id}))
        .await;
    let _ = c1.next_frame(); // join push
    let (_, first) = c1.next_frame();
    assert_eq!(first["success"], true);

    h.request(&c2, MSG_JOIN_ROOM, json!({"token": t2, "room_id": room_id}))
        .await;
    let (_, second) = c2.next_frame();
    assert_eq!(second["success"], false);
    assert_eq!(second["code"], 400);
    assert_eq!(second["message"], "room full");
}

#[tokio::test]
async fn malformed_json_yields_the_matching_error_response() {
    let h = harness();
    let mut c1 = h.connect(1);

    let frame = Frame {
        msg_type: MSG_LOGIN,
        payload: Bytes::from_static(b"{not json"),
    };
    handle_request(&h.state, c1.id, frame).await;

    let (msg_type, response) = c1.next_frame();
    assert_eq!(msg_type, MSG_LOGIN_RESPONSE);
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], 400);
}

#[tokio::test]
async fn unknown_message_type_gets_the_error_response() {
    let h = harness();
    let mut c1 = h.connect(1);

    h.request(&c1, 19, json!({})).await;
    let (msg_type, response) = c1.next_frame();
    assert_eq!(msg_type, MSG_ERROR_RESPONSE);
    assert_eq!(response["success"], false);
}

#[tokio::test]
async fn teardown_broadcasts_leave_and_drops_the_session() {
    let h = harness();
    let (_admin, _token, room_id) = h.admin_with_room(10, 0).await;

    let mut c1 = h.connect(1);
    let mut c2 = h.connect(2);
    let (t1, login1) = h.register_and_login(&mut c1, "a@x", "alice").await;
    let (t2, _) = h.register_and_login(&mut c2, "b@x", "bob").await;
    let user1 = login1["user"]["id"].as_i64().unwrap();

    h.request(&c1, MSG_JOIN_ROOM, json!({"token": t1, "room_id": room_id}))
        .await;
    let _ = c1.next_frame();
    let _ = c1.next_frame();
    h.request(&c2, MSG_JOIN_ROOM, json!({"token": t2, "room_id": room_id}))
        .await;
    let _ = c2.next_frame();
    let _ = c2.next_frame();
    let _ = c1.next_frame(); // bob's join push

    let sessions_before = h.state.sessions.len();
    cleanup_connection(&h.state, c1.id);

    // The survivor hears the leave.
    let (push_type, push) = c2.next_frame();
    assert_eq!(push_type, MSG_USER_LEAVE_PUSH);
    assert_eq!(push["user_id"], user1);
    assert_eq!(push["room_id"], room_id);

    assert_eq!(h.state.sessions.len(), sessions_before - 1);
    assert_eq!(h.state.registry.user_for_conn(c1.id), None);
    assert_eq!(h.state.registry.members_of(room_id).len(), 1);

    // Idempotent re-entry.
    cleanup_connection(&h.state, c1.id);
}

#[tokio::test]
async fn logout_is_a_self_teardown() {
    let h = harness();
    let mut c1 = h.connect(1);
    let (token, login) = h.register_and_login(&mut c1, "a@x", "alice").await;
    let user_id = login["user"]["id"].as_i64().unwrap();

    h.request(&c1, MSG_LOGOUT, json!({"token": token})).await;

    assert!(!h.state.connections.contains(1));
    assert_eq!(h.state.registry.user_for_conn(1), None);
    assert_eq!(h.state.registry.conn_for_user(user_id), None);
    assert!(h.state.sessions.is_empty());
}
