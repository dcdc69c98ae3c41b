//! Bounded database connection pool.
//!
//! Keeps between `min` and `max` live connections. Acquisition prefers
//! an idle connection, creates a new one below `max`, and otherwise
//! waits (bounded by the acquire timeout) for a release. A periodic
//! health check pings idle connections, evicts those idle longer than
//! `idle_timeout`, and refills toward `min`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendFactory};

/// Pool sizing and timing parameters.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Connections kept alive even when idle.
    pub min: usize,
    /// Hard ceiling on live connections.
    pub max: usize,
    /// Upper bound on waiting for a connection.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are evicted by the health check.
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min: 2,
            max: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out acquiring a database connection")]
    AcquireTimeout,

    #[error("failed to establish database connection: {0}")]
    Connect(String),
}

/// An exclusively held connection.
///
/// Callers must hand the connection back via [`ConnectionPool::release`]
/// on every exit path. Marking it broken makes the release discard it.
pub struct PooledConn {
    pub(crate) id: u64,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
    pub(crate) broken: bool,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConn {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Flag the connection as unusable; release will discard it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// Start a transaction on this connection.
    pub async fn begin(&mut self) -> Result<(), String> {
        self.backend.run("START TRANSACTION", &[]).await.map(|_| ())
    }

    pub async fn commit(&mut self) -> Result<(), String> {
        self.backend.run("COMMIT", &[]).await.map(|_| ())
    }

    pub async fn rollback(&mut self) -> Result<(), String> {
        self.backend.run("ROLLBACK", &[]).await.map(|_| ())
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("id", &self.id)
            .field("broken", &self.broken)
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    idle: Vec<PooledConn>,
    /// Live connections, idle and checked out.
    total: usize,
    next_id: u64,
}

/// Snapshot of pool occupancy, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub total: usize,
}

/// The pool proper. Cheap to share via `Arc`.
pub struct ConnectionPool {
    factory: Arc<dyn BackendFactory>,
    options: PoolOptions,
    inner: Mutex<PoolInner>,
    /// Bounds checked-out connections to `max`; waiting on a permit is
    /// the "pool exhausted" wait.
    semaphore: Arc<Semaphore>,
}

impl ConnectionPool {
    /// Create the pool and establish the initial `min` connections.
    ///
    /// Fails if not a single connection can be created.
    pub async fn connect(
        factory: Arc<dyn BackendFactory>,
        options: PoolOptions,
    ) -> Result<Self, PoolError> {
        let pool = Self {
            factory,
            semaphore: Arc::new(Semaphore::new(options.max)),
            options,
            inner: Mutex::new(PoolInner::default()),
        };

        let mut created = 0;
        let mut last_error = String::new();
        for _ in 0..pool.options.min {
            match pool.open_connection().await {
                Ok(conn) => {
                    let mut inner = pool.inner.lock().await;
                    inner.idle.push(conn);
                    inner.total += 1;
                    created += 1;
                }
                Err(e) => last_error = e,
            }
        }

        if created == 0 && pool.options.min > 0 {
            return Err(PoolError::Connect(last_error));
        }

        debug!(created, min = pool.options.min, max = pool.options.max, "connection pool ready");
        Ok(pool)
    }

    /// Acquire an exclusive connection, waiting at most the configured
    /// acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConn, PoolError> {
        let permit = timeout(
            self.options.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::AcquireTimeout)?
        .expect("pool semaphore never closes");

        // Prefer an idle connection.
        {
            let mut inner = self.inner.lock().await;
            if let Some(mut conn) = inner.idle.pop() {
                conn.last_used = Instant::now();
                conn.permit = Some(permit);
                return Ok(conn);
            }
            // Holding a permit with no idle connection implies headroom
            // below max; reserve the slot before the async connect.
            inner.total += 1;
        }

        match self.open_connection().await {
            Ok(mut conn) => {
                conn.permit = Some(permit);
                Ok(conn)
            }
            Err(e) => {
                self.inner.lock().await.total -= 1;
                Err(PoolError::Connect(e))
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// Broken connections are discarded and replaced up to `min`;
    /// healthy ones rejoin the idle queue unless it is already at `min`.
    pub async fn release(&self, mut conn: PooledConn) {
        let permit = conn.permit.take();

        if conn.broken {
            conn.backend.close().await;
            {
                let mut inner = self.inner.lock().await;
                inner.total -= 1;
            }
            drop(permit);
            self.refill_to_min().await;
            return;
        }

        let surplus = {
            let mut inner = self.inner.lock().await;
            if inner.idle.len() >= self.options.min {
                inner.total -= 1;
                Some(conn)
            } else {
                conn.last_used = Instant::now();
                inner.idle.push(conn);
                None
            }
        };

        if let Some(mut conn) = surplus {
            conn.backend.close().await;
        }
        drop(permit);
    }

    /// Ping idle connections, evict the dead and the stale, refill.
    pub async fn health_check(&self) {
        // Hold one permit per examined connection so concurrent acquires
        // cannot create into the slots while they are out of the queue.
        let (checked, permits) = {
            let mut inner = self.inner.lock().await;
            let count = inner.idle.len() as u32;
            let permits = match Arc::clone(&self.semaphore).try_acquire_many_owned(count) {
                Ok(permits) => permits,
                Err(_) => return,
            };
            (std::mem::take(&mut inner.idle), permits)
        };

        let mut kept = Vec::new();
        let mut dropped = 0;
        for mut conn in checked {
            if conn.last_used.elapsed() > self.options.idle_timeout {
                conn.backend.close().await;
                dropped += 1;
                continue;
            }
            if conn.backend.ping().await {
                kept.push(conn);
            } else {
                conn.backend.close().await;
                dropped += 1;
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.total -= dropped;
            inner.idle.extend(kept);
        }
        drop(permits);

        if dropped > 0 {
            debug!(dropped, "health check evicted connections");
        }
        self.refill_to_min().await;
    }

    /// Current occupancy.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            idle: inner.idle.len(),
            total: inner.total,
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    async fn refill_to_min(&self) {
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.total >= self.options.min {
                    return;
                }
            }
            match self.open_connection().await {
                Ok(conn) => {
                    let mut inner = self.inner.lock().await;
                    inner.idle.push(conn);
                    inner.total += 1;
                }
                Err(e) => {
                    warn!(error = %e, "failed to refill pool toward min");
                    return;
                }
            }
        }
    }

    async fn open_connection(&self) -> Result<PooledConn, String> {
        let backend = self.factory.connect().await?;
        let id = {
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            inner.next_id
        };
        let now = Instant::now();
        Ok(PooledConn {
            id,
            backend,
            created_at: now,
            last_used: now,
            broken: false,
            permit: None,
        })
    }
}

/// Run periodic health checks until shutdown flips.
pub async fn run_health_checks(
    pool: Arc<ConnectionPool>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => pool.health_check().await,
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeBackend {
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn run(&mut self, _sql: &str, _args: &[crate::SqlValue]) -> Result<RawOutcome, String> {
            Ok(RawOutcome::NoResultSet)
        }

        async fn ping(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn close(&mut self) {}
    }

    struct FakeFactory {
        connects: AtomicUsize,
        alive: Arc<AtomicBool>,
        fail: AtomicBool,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                alive: Arc::new(AtomicBool::new(true)),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl BackendFactory for FakeFactory {
        async fn connect(&self) -> Result<Box<dyn Backend>, String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("connection refused".to_string());
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeBackend {
                alive: Arc::clone(&self.alive),
            }))
        }
    }

    fn options(min: usize, max: usize) -> PoolOptions {
        PoolOptions {
            min,
            max,
            acquire_timeout: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn connect_establishes_min_connections() {
        let factory = Arc::new(FakeFactory::new());
        let pool = ConnectionPool::connect(Arc::clone(&factory) as _, options(2, 4))
            .await
            .unwrap();
        assert_eq!(pool.stats().await, PoolStats { idle: 2, total: 2 });
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_fails_when_nothing_can_be_created() {
        let factory = Arc::new(FakeFactory::new());
        factory.fail.store(true, Ordering::SeqCst);
        let result = ConnectionPool::connect(Arc::clone(&factory) as _, options(2, 4)).await;
        assert!(matches!(result, Err(PoolError::Connect(_))));
    }

    #[tokio::test]
    async fn acquire_prefers_idle_then_creates() {
        let factory = Arc::new(FakeFactory::new());
        let pool = ConnectionPool::connect(Arc::clone(&factory) as _, options(1, 3)).await.unwrap();

        let a = pool.acquire().await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1); // idle reused
        let b = pool.acquire().await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2); // created
        assert_eq!(pool.stats().await, PoolStats { idle: 0, total: 2 });

        pool.release(a).await;
        pool.release(b).await;
    }

    #[tokio::test]
    async fn saturated_pool_times_out_then_recovers() {
        let factory = Arc::new(FakeFactory::new());
        let pool = Arc::new(
            ConnectionPool::connect(Arc::clone(&factory) as _, options(1, 2)).await.unwrap(),
        );

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        // Third acquire has no headroom and must time out.
        assert!(matches!(pool.acquire().await, Err(PoolError::AcquireTimeout)));

        // A release unblocks a waiter.
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        pool.release(a).await;
        let c = waiter.await.unwrap().unwrap();
        pool.release(b).await;
        pool.release(c).await;
    }

    #[tokio::test]
    async fn broken_release_discards_and_refills_to_min() {
        let factory = Arc::new(FakeFactory::new());
        let pool = ConnectionPool::connect(Arc::clone(&factory) as _, options(1, 2)).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        pool.release(conn).await;

        let stats = pool.stats().await;
        assert_eq!(stats.total, 1, "discarded connection replaced up to min");
        assert_eq!(stats.idle, 1);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn release_trims_idle_above_min() {
        let factory = Arc::new(FakeFactory::new());
        let pool = ConnectionPool::connect(Arc::clone(&factory) as _, options(1, 3)).await.unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1, "idle trimmed back to min");
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn health_check_evicts_dead_and_refills() {
        let factory = Arc::new(FakeFactory::new());
        let pool = ConnectionPool::connect(Arc::clone(&factory) as _, options(2, 4)).await.unwrap();

        // Dead connections get evicted, then the refill creates fresh ones.
        factory.alive.store(false, Ordering::SeqCst);
        pool.health_check().await;
        let stats = pool.stats().await;
        assert_eq!(stats.total, 2, "evicted connections replaced toward min");

        factory.alive.store(true, Ordering::SeqCst);
        pool.health_check().await;
        assert_eq!(pool.stats().await.total, 2);
    }

    #[tokio::test]
    async fn health_check_evicts_stale_idle() {
        let factory = Arc::new(FakeFactory::new());
        let mut opts = options(1, 2);
        opts.idle_timeout = Duration::from_millis(0);
        let pool = ConnectionPool::connect(Arc::clone(&factory) as _, opts).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.health_check().await;
        // Stale connection dropped, fresh one created by refill.
        assert_eq!(pool.stats().await.total, 1);
        assert!(factory.connects.load(Ordering::SeqCst) >= 2);
    }
}
