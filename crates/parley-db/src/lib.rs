//! Parley persistence layer.
//!
//! Three levels, bottom up:
//!
//! 1. [`pool`] — a bounded pool of live database connections with
//!    health checking, idle eviction, and timed acquisition.
//! 2. [`gateway`] — parameterised statement execution over pooled
//!    connections, classifying driver errors and shaping results, plus
//!    a transactional wrapper.
//! 3. [`store`] — typed operations on users, rooms, and messages. One
//!    implementation backed by MySQL, one purely in memory for tests.

pub mod backend;
pub mod gateway;
pub mod pool;
pub mod result;
pub mod store;

pub use backend::{Backend, BackendFactory, MysqlFactory, RawOutcome};
pub use gateway::{BoxFuture, QueryGateway};
pub use pool::{ConnectionPool, PoolOptions, PooledConn};
pub use result::{ExecuteResult, QueryResult, SqlValue, subcode};
pub use store::{MessageStore, RoomStore, UserStore};
