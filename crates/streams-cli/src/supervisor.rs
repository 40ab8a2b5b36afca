//! Runs the replay server and the upstream ingestor as one unit.
//!
//! Three tasks share a cancellation scope:
//!
//! 1. accept-and-serve on the replay listener,
//! 2. a watcher that drains the server once the scope is cancelled,
//! 3. the upstream ingestion loop under its retry policy.
//!
//! The first task to fail cancels the scope and its error becomes the
//! result. Outcomes caused by the shutdown itself are not failures.

use std::sync::Arc;
use std::time::Duration;

use streams_ingest::{run_with_retry, FeedSource, IngestError, RetryState};
use streams_server::{ReplayServer, ServerError};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extra time granted to the tasks on top of the server's own drain limit.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("replay server failed: {0}")]
    Serve(#[source] ServerError),

    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("upstream retries exhausted after {attempts} attempts, last outcome: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("supervised task failed: {0}")]
    Task(String),
}

pub struct Supervisor {
    server: Arc<ReplayServer>,
    feed: Arc<dyn FeedSource>,
    retry: RetryState,
    shutdown_timeout: Duration,
}

impl Supervisor {
    pub fn new(
        server: Arc<ReplayServer>,
        feed: Arc<dyn FeedSource>,
        retry: RetryState,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            server,
            feed,
            retry,
            shutdown_timeout,
        }
    }

    /// Run until `root` is cancelled or a task fails.
    pub async fn run(self, listener: TcpListener, root: CancellationToken) -> Result<(), SupervisorError> {
        let scope = root.child_token();
        let mut tasks = JoinSet::new();

        let server = Arc::clone(&self.server);
        tasks.spawn(async move { server.serve(listener).await.map_err(SupervisorError::Serve) });

        let server = Arc::clone(&self.server);
        let stop = scope.clone();
        tasks.spawn(async move {
            stop.cancelled().await;
            info!("shutting down replay server");
            server.shutdown().await.map_err(|e| match e {
                ServerError::ShutdownTimeout(after) => SupervisorError::ShutdownTimeout(after),
                other => SupervisorError::Serve(other),
            })
        });

        let feed = Arc::clone(&self.feed);
        let retry = self.retry.clone();
        let ingest = scope.clone();
        tasks.spawn(async move {
            run_with_retry(feed.as_ref(), retry, &ingest)
                .await
                .map_err(|e| match e {
                    IngestError::RetriesExhausted { attempts, last } => {
                        SupervisorError::RetriesExhausted { attempts, last }
                    }
                    other => SupervisorError::Task(other.to_string()),
                })
        });

        let mut failure = None;
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(joined) => record(joined, &mut failure, &scope),
                    None => break,
                },
            }
        }

        let drain_limit = self.shutdown_timeout + DRAIN_GRACE;
        let drained = timeout(drain_limit, async {
            while let Some(joined) = tasks.join_next().await {
                record(joined, &mut failure, &scope);
            }
        })
        .await;
        if drained.is_err() {
            warn!(?drain_limit, remaining = tasks.len(), "tasks still running; aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            failure.get_or_insert(SupervisorError::ShutdownTimeout(drain_limit));
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Keep the first real failure and cancel the scope on it.
fn record(
    joined: Result<Result<(), SupervisorError>, JoinError>,
    failure: &mut Option<SupervisorError>,
    scope: &CancellationToken,
) {
    let result = match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => {
            debug!("supervised task cancelled");
            Ok(())
        }
        Err(e) => Err(SupervisorError::Task(e.to_string())),
    };
    if let Err(e) = result {
        if failure.is_none() {
            error!(error = %e, "supervised task failed; stopping");
            *failure = Some(e);
        } else {
            debug!(error = %e, "additional failure during shutdown");
        }
        scope.cancel();
    }
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}
