//! Worker pool.
//!
//! A fixed number of tasks drain one shared unbounded job queue. Jobs
//! are per-frame request handling and connection teardown; there is no
//! ordering guarantee across jobs — the registry locks serialise state
//! mutation.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use parley_proto::Frame;

use crate::conn::ConnId;
use crate::dispatcher;
use crate::state::ServerState;

/// A unit of work for the pool.
#[derive(Debug)]
pub enum Job {
    Request(ConnId, Frame),
    Cleanup(ConnId),
}

/// Spawn `count` workers over one shared receiver.
pub fn spawn(
    count: usize,
    state: Arc<ServerState>,
    jobs: mpsc::UnboundedReceiver<Job>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let jobs = Arc::new(Mutex::new(jobs));
    (0..count.max(1))
        .map(|worker| {
            let state = Arc::clone(&state);
            let jobs = Arc::clone(&jobs);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        job = async { jobs.lock().await.recv().await } => job,
                        _ = shutdown.changed() => break,
                    };
                    match job {
                        Some(Job::Request(conn_id, frame)) => {
                            dispatcher::handle_request(&state, conn_id, frame).await;
                        }
                        Some(Job::Cleanup(conn_id)) => {
                            dispatcher::cleanup_connection(&state, conn_id);
                        }
                        None => break,
                    }
                }
                debug!(worker, "worker stopped");
            })
        })
        .collect()
}
