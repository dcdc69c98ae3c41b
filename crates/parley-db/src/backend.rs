//! Connection backends — the transport under the pool.
//!
//! The pool and gateway operate on the [`Backend`] trait so tests can
//! substitute a mock; production uses [`MysqlFactory`], which speaks
//! to the server through `mysql_async` raw connections (driver-side
//! pooling stays off — the pool above is the only pool).

use async_trait::async_trait;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Row, Value};

use parley_core::DbConfig;

use crate::result::SqlValue;

/// Raw shape of one statement execution, before gateway classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// No result set was produced (INSERT/UPDATE/DELETE/DDL).
    NoResultSet,
    /// A result set, every column rendered as text (NULL → empty).
    ResultSet(Vec<Vec<String>>),
}

/// One live database connection.
///
/// Errors are surfaced as driver message strings; the gateway owns
/// their classification.
#[async_trait]
pub trait Backend: Send + std::fmt::Debug {
    /// Execute one parameterised statement.
    async fn run(&mut self, sql: &str, args: &[SqlValue]) -> Result<RawOutcome, String>;

    /// Health-check ping. `false` means the connection is dead.
    async fn ping(&mut self) -> bool;

    /// Close the underlying transport.
    async fn close(&mut self);
}

/// Factory establishing new connections — injected for testability.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Backend>, String>;
}

// ── MySQL ────────────────────────────────────────────────────────────

/// A [`Backend`] over one `mysql_async` connection.
pub struct MysqlBackend {
    conn: Option<Conn>,
}

impl std::fmt::Debug for MysqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlBackend")
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

fn to_driver_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Int(v) => Value::Int(*v),
        SqlValue::Uint(v) => Value::UInt(*v),
        SqlValue::Str(v) => Value::Bytes(v.clone().into_bytes()),
        // The schema stores booleans as TRUE/FALSE text.
        SqlValue::Bool(v) => Value::Bytes(if *v { b"TRUE".to_vec() } else { b"FALSE".to_vec() }),
        SqlValue::Double(v) => Value::Double(*v),
    }
}

fn column_to_string(value: Value) -> String {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Date(year, month, day, hour, minute, second, _micros) => {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
        }
        Value::Time(negative, days, hours, minutes, seconds, _micros) => {
            let sign = if negative { "-" } else { "" };
            format!("{sign}{:02}:{minutes:02}:{seconds:02}", days * 24 + hours as u32)
        }
    }
}

#[async_trait]
impl Backend for MysqlBackend {
    async fn run(&mut self, sql: &str, args: &[SqlValue]) -> Result<RawOutcome, String> {
        let conn = self.conn.as_mut().ok_or_else(|| "connection closed".to_string())?;

        let params = if args.is_empty() {
            Params::Empty
        } else {
            Params::Positional(args.iter().map(to_driver_value).collect())
        };

        let mut result = conn
            .exec_iter(sql, params)
            .await
            .map_err(|e| e.to_string())?;

        let has_result_set = result.columns().is_some();
        let rows: Vec<Row> = result.collect().await.map_err(|e| e.to_string())?;
        drop(result);

        if !has_result_set {
            return Ok(RawOutcome::NoResultSet);
        }

        let rows = rows
            .into_iter()
            .map(|row| row.unwrap().into_iter().map(column_to_string).collect())
            .collect();
        Ok(RawOutcome::ResultSet(rows))
    }

    async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.disconnect().await;
        }
    }
}

/// Creates MySQL connections from a [`DbConfig`].
pub struct MysqlFactory {
    opts: Opts,
}

impl MysqlFactory {
    pub fn new(config: &DbConfig) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()));
        Self { opts: Opts::from(opts) }
    }
}

#[async_trait]
impl BackendFactory for MysqlFactory {
    async fn connect(&self) -> Result<Box<dyn Backend>, String> {
        let conn = Conn::new(self.opts.clone())
            .await
            .map_err(|e| e.to_string())?;
        Ok(Box::new(MysqlBackend { conn: Some(conn) }))
    }
}
