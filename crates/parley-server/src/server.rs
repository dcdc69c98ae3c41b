//! Server assembly and the TCP loops.
//!
//! One accept loop task; per connection, a read task feeding frames to
//! the worker queue and a writer task draining the outbound channel.
//! All loops watch the shutdown flag and stop within one poll interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use bytes::Bytes;
use parley_proto::FrameBuffer;

use crate::conn::{ConnId, WRITE_CHUNK};
use crate::dispatcher;
use crate::session;
use crate::state::ServerState;
use crate::workers::{self, Job};

/// The chat server: shared state plus the lifecycle of its loops.
pub struct ChatServer {
    state: Arc<ServerState>,
    shutdown: watch::Sender<bool>,
    /// Published once the listener is bound; port 0 configs resolve to
    /// an ephemeral port readable here.
    bound: watch::Sender<Option<std::net::SocketAddr>>,
    next_conn_id: AtomicU64,
}

impl ChatServer {
    pub fn new(state: ServerState) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (bound, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
            shutdown,
            bound,
            next_conn_id: AtomicU64::new(0),
        }
    }

    /// Watch for the listener's bound address.
    pub fn bound_addr(&self) -> watch::Receiver<Option<std::net::SocketAddr>> {
        self.bound.subscribe()
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Seed the room registry from the persisted rooms.
    pub async fn preload_rooms(&self) -> anyhow::Result<()> {
        let rooms = self.state.services.chat.get_all_rooms().await;
        let rooms = rooms
            .data
            .with_context(|| format!("failed to load rooms: {}", rooms.message))?;
        self.state.registry.preload(&rooms);
        Ok(())
    }

    /// Ask every loop to stop. Observed within one poll interval.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A receiver for wiring external tasks (pool health checks) into
    /// this server's shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Bind, then serve until shutdown.
    pub async fn run(&self) -> anyhow::Result<()> {
        let port = self.state.config.port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        let local_addr = listener.local_addr().context("listener has no local address")?;
        let _ = self.bound.send(Some(local_addr));
        info!(addr = %local_addr, "chat server listening");

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let worker_handles = workers::spawn(
            self.state.config.worker_count,
            Arc::clone(&self.state),
            jobs_rx,
            self.shutdown.subscribe(),
        );

        let sweeper = tokio::spawn(session::run_sweeper(
            Arc::clone(&self.state.sessions),
            self.state.config.cleanup_interval,
            self.shutdown.subscribe(),
        ));

        let mut shutdown = self.shutdown.subscribe();
        // interval() rejects a zero period; clamp pathological configs.
        let poll = self.state.config.poll_timeout.max(std::time::Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval(poll);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    tracing::trace!(
                        connections = self.state.connections.len(),
                        sessions = self.state.sessions.len(),
                        "accept loop heartbeat"
                    );
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                            }
                            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
                            debug!(conn = conn_id, %peer, "connection accepted");
                            spawn_connection(
                                Arc::clone(&self.state),
                                jobs_tx.clone(),
                                conn_id,
                                stream,
                            );
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("chat server stopping");
        for conn_id in self.state.connections.ids() {
            dispatcher::cleanup_connection(&self.state, conn_id);
        }
        drop(jobs_tx);
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = sweeper.await;
        Ok(())
    }
}

/// Register a connection and start its read and write tasks.
fn spawn_connection(
    state: Arc<ServerState>,
    jobs: mpsc::UnboundedSender<Job>,
    conn_id: ConnId,
    stream: tokio::net::TcpStream,
) {
    let (read_half, write_half) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    state
        .connections
        .insert(conn_id, outbox_tx, Arc::clone(&queued), shutdown_tx);

    tokio::spawn(write_loop(
        conn_id,
        write_half,
        outbox_rx,
        queued,
        jobs.clone(),
    ));
    tokio::spawn(read_loop(state, jobs, conn_id, read_half, shutdown_rx));
}

/// Drain the socket into the frame buffer and hand complete frames to
/// the workers. Any error, EOF, or buffer overflow schedules teardown.
async fn read_loop(
    state: Arc<ServerState>,
    jobs: mpsc::UnboundedSender<Job>,
    conn_id: ConnId,
    mut read_half: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = FrameBuffer::new(state.config.max_read_buffer);
    let mut chunk = [0u8; 4096];

    loop {
        let read = tokio::select! {
            read = read_half.read(&mut chunk) => read,
            _ = shutdown.changed() => break,
        };

        match read {
            Ok(0) => {
                debug!(conn = conn_id, "peer closed");
                let _ = jobs.send(Job::Cleanup(conn_id));
                break;
            }
            Ok(n) => {
                if buffer.push(&chunk[..n]).is_err() {
                    warn!(conn = conn_id, "read buffer overflow, closing");
                    let _ = jobs.send(Job::Cleanup(conn_id));
                    break;
                }
                for frame in buffer.extract() {
                    let _ = jobs.send(Job::Request(conn_id, frame));
                }
            }
            Err(e) => {
                debug!(conn = conn_id, error = %e, "read error");
                let _ = jobs.send(Job::Cleanup(conn_id));
                break;
            }
        }
    }
}

/// Drain the outbound queue in small chunks. When the channel closes
/// (connection removed from the map) the remaining tail is flushed and
/// the socket shut down.
async fn write_loop(
    conn_id: ConnId,
    mut write_half: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
    jobs: mpsc::UnboundedSender<Job>,
) {
    while let Some(frame) = outbox.recv().await {
        let len = frame.len();
        let mut failed = false;
        for piece in frame.chunks(WRITE_CHUNK) {
            if let Err(e) = write_half.write_all(piece).await {
                debug!(conn = conn_id, error = %e, "write error");
                failed = true;
                break;
            }
        }
        queued.fetch_sub(len, Ordering::AcqRel);

        if failed {
            let _ = jobs.send(Job::Cleanup(conn_id));
            break;
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!(conn = conn_id, error = %e, "socket shutdown");
    }
}
