//! Parley realtime runtime.
//!
//! The pieces that make the server a server: the connection map with
//! its byte-capped outbound queues, the accept/read/write loops, the
//! worker pool, the bearer-token session store, the room registry with
//! its identity bi-maps, the per-message dispatcher, and the fan-out
//! notifier.
//!
//! # Architecture
//!
//! ```text
//! accept loop ── registers ──► ConnectionMap
//!      │                            ▲
//!      ▼                            │ enqueue (capped)
//! per-conn read loop ── frames ──► worker pool ── dispatcher
//!                                       │             │
//!                                       ▼             ▼
//!                                  SessionStore   RoomRegistry ──► broadcast
//!                                       │             │
//!                                       └── Services ─┴──► stores (MySQL pool)
//! ```
//!
//! Registry and session locks are plain mutexes held only for map
//! mutation, never across I/O or `.await`. Cross-structure lock order:
//! connections, then active rooms, then inactive rooms, then the
//! conn/user bi-maps, then user-to-room, then the token table.

pub mod broadcast;
pub mod conn;
pub mod dispatcher;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;
pub mod workers;

pub use server::ChatServer;
pub use state::ServerState;
