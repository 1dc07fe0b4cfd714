use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{create_router, AppState};
use social_core::Store;

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { state, addr }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let store = self.state.store.clone();
        let flush_every = Duration::from_secs(self.state.settings.database.flush_interval_secs);
        let flusher = spawn_flush_loop(store.clone(), flush_every);
        let limiter = self.state.auth_limiter.clone();
        let pruner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                limiter.retain_recent();
            }
        });

        let router = create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding {}", self.addr))?;

        info!("Social API listening on http://{}", self.addr);
        info!("  /api/auth, /api/user, /api/post, /api/comment, /api/commentreply, /api/hashtag");
        info!("  GET /health - Health check");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

        pruner.abort();
        if let Some(flusher) = flusher {
            flusher.abort();
        }
        if store.flush().await.context("final snapshot flush")? {
            info!("Snapshot written on shutdown");
        }
        Ok(())
    }
}

/// Periodically writes the snapshot while the server runs.
fn spawn_flush_loop(store: Store, every: Duration) -> Option<JoinHandle<()>> {
    if !store.is_persistent() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = store.flush().await {
                error!(error = %e, "Snapshot flush failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
