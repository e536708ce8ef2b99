//! TCP Server
//!
//! Accepts connections and spawns one session task per client. When the
//! shutdown future resolves the listener is closed, every session is told
//! to stop after its in-flight command, and `run` returns once all of them
//! have finished.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Serves clients on `listener` until `shutdown` resolves.
///
/// Every session shares `handler`'s storage engine and settings.
pub async fn run(
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    idle_timeout: Option<Duration>,
    shutdown: impl Future<Output = ()>,
) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sessions = JoinSet::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    sessions.spawn(handle_connection(
                        stream,
                        addr,
                        handler.clone(),
                        Arc::clone(&stats),
                        shutdown_rx.clone(),
                        idle_timeout,
                    ));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            },
            // Reap finished sessions so the set does not grow without bound
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    let _ = shutdown_tx.send(true);

    info!(sessions = sessions.len(), "Waiting for open connections to close");
    while sessions.join_next().await.is_some() {}
    debug!("All connections closed");
}
