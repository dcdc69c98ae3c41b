//! In-memory room registry and identity bi-maps.
//!
//! Who is where right now: active and inactive rooms with their member
//! sets, plus `conn↔user` and `user→room` mappings. Each map has its
//! own mutex. Lock order, outermost first:
//!
//! ```text
//! active > inactive > conn_to_user > user_to_conn > user_to_room
//! ```
//!
//! Nested acquisitions always follow that order (skipping levels is
//! fine); sequential single-lock scopes are unconstrained. Locks guard
//! only map mutation; snapshots are taken for anything that leads to
//! I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

use parley_core::Room;

use crate::conn::ConnId;

/// Runtime state of one room.
#[derive(Debug, Clone)]
pub struct RoomRuntime {
    pub name: String,
    pub description: String,
    pub max_users: i64,
    pub creator_id: i64,
    pub created_time: String,
    pub users: HashSet<i64>,
}

impl RoomRuntime {
    fn from_room(room: &Room) -> Self {
        Self {
            name: room.name.clone(),
            description: room.description.clone(),
            max_users: room.max_users,
            creator_id: room.creator_id,
            created_time: room.created_time.clone(),
            users: HashSet::new(),
        }
    }
}

/// Room fields exposed in listings and login payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub creator_id: i64,
    pub max_users: i64,
    pub current_users: usize,
    pub created_time: String,
}

/// Join refusals.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("already in a room")]
    AlreadyInRoom,

    #[error("room not found")]
    RoomNotFound,

    #[error("room full")]
    RoomFull,
}

/// What a connection cleanup found and removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub user_id: Option<i64>,
    pub room_id: Option<i64>,
}

#[derive(Default)]
pub struct RoomRegistry {
    active: Mutex<HashMap<i64, RoomRuntime>>,
    inactive: Mutex<HashMap<i64, RoomRuntime>>,
    conn_to_user: Mutex<HashMap<ConnId, i64>>,
    user_to_conn: Mutex<HashMap<i64, ConnId>>,
    user_to_room: Mutex<HashMap<i64, i64>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed both maps from persisted rooms at startup.
    pub fn preload(&self, rooms: &[Room]) {
        let mut active = self.active.lock().unwrap();
        let mut inactive = self.inactive.lock().unwrap();
        for room in rooms {
            let runtime = RoomRuntime::from_room(room);
            if room.is_active {
                active.insert(room.id, runtime);
            } else {
                inactive.insert(room.id, runtime);
            }
        }
        info!(
            total = active.len() + inactive.len(),
            active = active.len(),
            "rooms loaded into registry"
        );
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// The connection a user is currently bound to, unless it is
    /// `current`. Used by login to find the session to kick.
    pub fn previous_conn_for(&self, user_id: i64, current: ConnId) -> Option<ConnId> {
        let user_to_conn = self.user_to_conn.lock().unwrap();
        match user_to_conn.get(&user_id) {
            Some(&conn) if conn != current => Some(conn),
            _ => None,
        }
    }

    /// Bind a connection to a user in both directions.
    pub fn bind_identity(&self, conn_id: ConnId, user_id: i64) {
        let mut conn_to_user = self.conn_to_user.lock().unwrap();
        let mut user_to_conn = self.user_to_conn.lock().unwrap();
        conn_to_user.insert(conn_id, user_id);
        user_to_conn.insert(user_id, conn_id);
    }

    /// The authenticated user behind a connection, if any.
    pub fn user_for_conn(&self, conn_id: ConnId) -> Option<i64> {
        self.conn_to_user.lock().unwrap().get(&conn_id).copied()
    }

    pub fn conn_for_user(&self, user_id: i64) -> Option<ConnId> {
        self.user_to_conn.lock().unwrap().get(&user_id).copied()
    }

    pub fn room_of_user(&self, user_id: i64) -> Option<i64> {
        self.user_to_room.lock().unwrap().get(&user_id).copied()
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Atomically join a room: re-checks membership, existence, and
    /// capacity under the locks before inserting into both structures.
    pub fn join_room(&self, user_id: i64, room_id: i64) -> Result<(), JoinError> {
        let mut active = self.active.lock().unwrap();
        let mut user_to_room = self.user_to_room.lock().unwrap();

        if user_to_room.contains_key(&user_id) {
            return Err(JoinError::AlreadyInRoom);
        }
        let Some(room) = active.get_mut(&room_id) else {
            return Err(JoinError::RoomNotFound);
        };
        if room.max_users > 0 && room.users.len() as i64 >= room.max_users {
            return Err(JoinError::RoomFull);
        }

        room.users.insert(user_id);
        user_to_room.insert(user_id, room_id);
        Ok(())
    }

    /// Leave the current room. Returns the room left, if any.
    pub fn leave_room(&self, user_id: i64) -> Option<i64> {
        let mut active = self.active.lock().unwrap();
        let mut user_to_room = self.user_to_room.lock().unwrap();

        let room_id = user_to_room.remove(&user_id)?;
        if let Some(room) = active.get_mut(&room_id) {
            room.users.remove(&user_id);
        }
        Some(room_id)
    }

    /// Member snapshot of an active room.
    pub fn members_of(&self, room_id: i64) -> Vec<i64> {
        let active = self.active.lock().unwrap();
        active
            .get(&room_id)
            .map(|room| room.users.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Translate user ids to live connection ids.
    pub fn conns_for_users(&self, user_ids: &[i64]) -> Vec<ConnId> {
        let user_to_conn = self.user_to_conn.lock().unwrap();
        user_ids
            .iter()
            .filter_map(|user| user_to_conn.get(user).copied())
            .collect()
    }

    // ── Room lifecycle ───────────────────────────────────────────────

    /// Register a freshly created (active) room.
    pub fn insert_room(&self, room: &Room) {
        let runtime = RoomRuntime::from_room(room);
        if room.is_active {
            self.active.lock().unwrap().insert(room.id, runtime);
        } else {
            self.inactive.lock().unwrap().insert(room.id, runtime);
        }
    }

    /// Move a room from inactive to active. Member set stays as is —
    /// empty, by the deactivation invariant.
    pub fn activate_room(&self, room_id: i64) -> bool {
        let mut active = self.active.lock().unwrap();
        let mut inactive = self.inactive.lock().unwrap();
        match inactive.remove(&room_id) {
            Some(runtime) => {
                active.insert(room_id, runtime);
                true
            }
            None => false,
        }
    }

    /// Move a room from active to inactive, evicting every member.
    ///
    /// Returns the evicted user ids (snapshot taken before the member
    /// set is cleared) so the caller can notify them.
    pub fn deactivate_room(&self, room_id: i64) -> Option<Vec<i64>> {
        let mut active = self.active.lock().unwrap();
        let mut inactive = self.inactive.lock().unwrap();

        let mut runtime = active.remove(&room_id)?;
        let evicted: Vec<i64> = runtime.users.iter().copied().collect();
        runtime.users.clear();

        {
            let mut user_to_room = self.user_to_room.lock().unwrap();
            for user in &evicted {
                user_to_room.remove(user);
            }
        }

        inactive.insert(room_id, runtime);
        debug!(room = room_id, evicted = evicted.len(), "room deactivated");
        Some(evicted)
    }

    /// Remove a room from whichever map holds it, clearing memberships.
    ///
    /// Returns the members that were in it (active rooms only; inactive
    /// rooms have none).
    pub fn remove_room(&self, room_id: i64) -> Vec<i64> {
        let mut active = self.active.lock().unwrap();
        let mut inactive = self.inactive.lock().unwrap();

        let members = match active.remove(&room_id) {
            Some(runtime) => runtime.users.into_iter().collect::<Vec<_>>(),
            None => {
                inactive.remove(&room_id);
                Vec::new()
            }
        };

        if !members.is_empty() {
            let mut user_to_room = self.user_to_room.lock().unwrap();
            for user in &members {
                user_to_room.remove(user);
            }
        }
        members
    }

    /// Update room metadata in whichever map holds the room.
    pub fn update_room(&self, room_id: i64, apply: impl Fn(&mut RoomRuntime)) -> bool {
        {
            let mut active = self.active.lock().unwrap();
            if let Some(room) = active.get_mut(&room_id) {
                apply(room);
                return true;
            }
        }
        let mut inactive = self.inactive.lock().unwrap();
        match inactive.get_mut(&room_id) {
            Some(room) => {
                apply(room);
                true
            }
            None => false,
        }
    }

    /// Whether an active room with this id exists.
    pub fn is_active_room(&self, room_id: i64) -> bool {
        self.active.lock().unwrap().contains_key(&room_id)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn active_summaries(&self) -> Vec<RoomSummary> {
        Self::summaries(&self.active.lock().unwrap())
    }

    pub fn inactive_summaries(&self) -> Vec<RoomSummary> {
        Self::summaries(&self.inactive.lock().unwrap())
    }

    fn summaries(rooms: &HashMap<i64, RoomRuntime>) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|(&id, room)| RoomSummary {
                id,
                name: room.name.clone(),
                description: room.description.clone(),
                creator_id: room.creator_id,
                max_users: room.max_users,
                current_users: room.users.len(),
                created_time: room.created_time.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| b.id.cmp(&a.id));
        summaries
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Strip every trace of a connection: identity entries (only where
    /// they still point at this connection), room membership, member
    /// set. Idempotent — a second call finds nothing.
    pub fn cleanup_conn(&self, conn_id: ConnId) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();

        let user_id = {
            let mut conn_to_user = self.conn_to_user.lock().unwrap();
            conn_to_user.remove(&conn_id)
        };
        let Some(user_id) = user_id else {
            return outcome;
        };
        outcome.user_id = Some(user_id);

        {
            let mut user_to_conn = self.user_to_conn.lock().unwrap();
            if user_to_conn.get(&user_id) == Some(&conn_id) {
                user_to_conn.remove(&user_id);
            }
        }

        let room_id = {
            let mut user_to_room = self.user_to_room.lock().unwrap();
            user_to_room.remove(&user_id)
        };
        if let Some(room_id) = room_id {
            outcome.room_id = Some(room_id);
            let mut active = self.active.lock().unwrap();
            if let Some(room) = active.get_mut(&room_id) {
                room.users.remove(&user_id);
            }
        }

        outcome
    }
}
