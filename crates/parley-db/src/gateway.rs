//! Parameterised statement execution over the pool.
//!
//! Classifies driver errors into the `QueryResult` taxonomy, shapes
//! result sets into [`ExecuteResult`], and wraps transactional work:
//! acquire, begin, run the closure on the held connection, commit on
//! success, roll back on anything else, always release.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use crate::backend::RawOutcome;
use crate::pool::{ConnectionPool, PoolError, PooledConn};
use crate::result::{ExecuteResult, QueryResult, SqlValue};

/// Boxed future tied to a borrowed connection, used by the
/// transactional closure.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Substrings of driver error text that indicate a transport problem
/// rather than a statement problem.
const CONNECTION_ERROR_MARKERS: [&str; 5] =
    ["connection", "timeout", "refused", "lost", "network"];

fn classify<T>(error: String) -> QueryResult<T> {
    let lower = error.to_lowercase();
    if CONNECTION_ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        QueryResult::ConnectionError(error)
    } else {
        QueryResult::InternalError(error)
    }
}

impl<T> From<PoolError> for QueryResult<T> {
    fn from(e: PoolError) -> Self {
        QueryResult::ConnectionError(e.to_string())
    }
}

/// Statement executor shared by every store.
pub struct QueryGateway {
    pool: Arc<ConnectionPool>,
}

impl QueryGateway {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Execute one statement on a freshly acquired connection.
    pub async fn execute(&self, sql: &str, args: &[SqlValue]) -> QueryResult<ExecuteResult> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return e.into(),
        };
        let result = Self::execute_on(&mut conn, sql, args).await;
        self.pool.release(conn).await;
        result
    }

    /// Execute one statement on a connection the caller already holds.
    pub async fn execute_on(
        conn: &mut PooledConn,
        sql: &str,
        args: &[SqlValue],
    ) -> QueryResult<ExecuteResult> {
        match conn.backend_mut().run(sql, args).await {
            Ok(RawOutcome::NoResultSet) => QueryResult::Success(ExecuteResult::Empty),
            Ok(RawOutcome::ResultSet(mut rows)) => match rows.len() {
                0 => QueryResult::not_found(),
                1 => QueryResult::Success(ExecuteResult::Row(rows.pop().unwrap_or_default())),
                _ => QueryResult::Success(ExecuteResult::Rows(rows)),
            },
            Err(error) => {
                conn.mark_broken();
                classify(error)
            }
        }
    }

    /// Run `work` inside a transaction on one held connection.
    ///
    /// Commits only when the closure reports `Success`; rolls back on
    /// every other variant. The connection is always released.
    pub async fn execute_in_transaction<F>(&self, work: F) -> QueryResult<ExecuteResult>
    where
        F: for<'c> FnOnce(&'c mut PooledConn) -> BoxFuture<'c, QueryResult<ExecuteResult>>,
    {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return e.into(),
        };

        if let Err(error) = conn.begin().await {
            conn.mark_broken();
            self.pool.release(conn).await;
            return classify(error);
        }

        let result = work(&mut conn).await;

        let finished = if result.is_success() {
            conn.commit().await
        } else {
            conn.rollback().await
        };

        if let Err(error) = finished {
            warn!(error = %error, "transaction finalisation failed");
            conn.mark_broken();
            self.pool.release(conn).await;
            return classify(error);
        }

        self.pool.release(conn).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendFactory};
    use crate::pool::PoolOptions;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted backend: records statements, pops canned outcomes.
    #[derive(Debug, Default)]
    struct ScriptState {
        log: Vec<String>,
        responses: Vec<Result<RawOutcome, String>>,
    }

    #[derive(Debug)]
    struct ScriptedBackend {
        state: Arc<Mutex<ScriptState>>,
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn run(&mut self, sql: &str, _args: &[SqlValue]) -> Result<RawOutcome, String> {
            let mut state = self.state.lock().unwrap();
            state.log.push(sql.to_string());
            if state.responses.is_empty() {
                Ok(RawOutcome::NoResultSet)
            } else {
                state.responses.remove(0)
            }
        }

        async fn ping(&mut self) -> bool {
            true
        }

        async fn close(&mut self) {}
    }

    struct ScriptedFactory {
        state: Arc<Mutex<ScriptState>>,
    }

    #[async_trait]
    impl BackendFactory for ScriptedFactory {
        async fn connect(&self) -> Result<Box<dyn Backend>, String> {
            Ok(Box::new(ScriptedBackend {
                state: Arc::clone(&self.state),
            }))
        }
    }

    async fn gateway_with(
        responses: Vec<Result<RawOutcome, String>>,
    ) -> (QueryGateway, Arc<Mutex<ScriptState>>) {
        let state = Arc::new(Mutex::new(ScriptState {
            log: Vec::new(),
            responses,
        }));
        let factory = Arc::new(ScriptedFactory {
            state: Arc::clone(&state),
        });
        let pool = ConnectionPool::connect(
            factory as _,
            PoolOptions {
                min: 1,
                max: 2,
                acquire_timeout: Duration::from_millis(100),
                idle_timeout: Duration::from_secs(300),
            },
        )
        .await
        .unwrap();
        (QueryGateway::new(Arc::new(pool)), state)
    }

    #[test]
    fn classification_follows_error_text() {
        assert!(matches!(
            classify::<()>("Connection refused by peer".into()),
            QueryResult::ConnectionError(_)
        ));
        assert!(matches!(
            classify::<()>("read TIMEOUT while waiting".into()),
            QueryResult::ConnectionError(_)
        ));
        assert!(matches!(
            classify::<()>("syntax error near SELECT".into()),
            QueryResult::InternalError(_)
        ));
    }

    #[tokio::test]
    async fn result_shapes_map_to_execute_result() {
        let (gateway, _) = gateway_with(vec![
            Ok(RawOutcome::NoResultSet),
            Ok(RawOutcome::ResultSet(vec![])),
            Ok(RawOutcome::ResultSet(vec![vec!["1".into()]])),
            Ok(RawOutcome::ResultSet(vec![vec!["1".into()], vec!["2".into()]])),
        ])
        .await;

        assert_eq!(
            gateway.execute("INSERT", &[]).await,
            QueryResult::Success(ExecuteResult::Empty)
        );
        assert_eq!(gateway.execute("SELECT", &[]).await, QueryResult::not_found());
        assert_eq!(
            gateway.execute("SELECT", &[]).await,
            QueryResult::Success(ExecuteResult::Row(vec!["1".into()]))
        );
        assert_eq!(
            gateway.execute("SELECT", &[]).await,
            QueryResult::Success(ExecuteResult::Rows(vec![
                vec!["1".into()],
                vec!["2".into()]
            ]))
        );
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let (gateway, state) = gateway_with(vec![]).await;

        let result = gateway
            .execute_in_transaction(|conn| {
                Box::pin(async move { QueryGateway::execute_on(conn, "UPDATE users", &[]).await })
            })
            .await;

        assert!(result.is_success());
        let log = state.lock().unwrap().log.clone();
        assert_eq!(log, vec!["START TRANSACTION", "UPDATE users", "COMMIT"]);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_not_found() {
        let (gateway, state) = gateway_with(vec![
            Ok(RawOutcome::NoResultSet), // START TRANSACTION
            Ok(RawOutcome::ResultSet(vec![])), // the probe comes back empty
        ])
        .await;

        let result = gateway
            .execute_in_transaction(|conn| {
                Box::pin(async move { QueryGateway::execute_on(conn, "SELECT probe", &[]).await })
            })
            .await;

        assert!(result.is_not_found());
        let log = state.lock().unwrap().log.clone();
        assert_eq!(log, vec!["START TRANSACTION", "SELECT probe", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn driver_error_marks_connection_broken() {
        let (gateway, _) = gateway_with(vec![Err("connection lost mid-query".into())]).await;

        let result = gateway.execute("SELECT", &[]).await;
        assert!(matches!(result, QueryResult::ConnectionError(_)));
        // The broken connection was discarded and replaced toward min.
        assert_eq!(gateway.pool().stats().await.total, 1);
    }
}
