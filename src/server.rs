//! Server implementation
//!
//! Binds the HTTP router to a listener and closes every cursor on the way
//! out.

use std::future::Future;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::cursor::CursorPool;
use crate::engine::{Executor, PgExecutor};
use crate::error::{CursorError, CursorResult};
use crate::router::create_router;

pub struct Server<E: Executor> {
    config: Config,
    pool: CursorPool<E>,
}

impl Server<PgExecutor> {
    /// Connect to the configured database and check the connection.
    pub async fn connect(config: Config) -> CursorResult<Self> {
        tracing::info!("Connecting to database...");
        let executor = PgExecutor::connect(&config.database_url)
            .await
            .map_err(|e| CursorError::Connection(e.to_string()))?;

        executor
            .ping()
            .await
            .map_err(|e| CursorError::Connection(format!("Failed to test connection: {}", e)))?;

        Ok(Self::new(config, executor))
    }
}

impl<E: Executor> Server<E> {
    pub fn new(config: Config, executor: E) -> Self {
        let pool_config = config.pool();
        tracing::info!(
            "Cursor pool: ttl={}s, max_page_size={}",
            pool_config.session_ttl().as_secs(),
            pool_config.page_size_limit()
        );

        Self {
            pool: CursorPool::with_config(executor, pool_config),
            config,
        }
    }

    pub fn pool(&self) -> &CursorPool<E> {
        &self.pool
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.pool.clone())
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn serve(&self) -> CursorResult<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `signal` resolves, then close all cursors.
    pub async fn serve_with_shutdown<F>(&self, signal: F) -> CursorResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = &self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CursorError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("pgcursor listening on {}", addr);
        tracing::info!("   GET /users           - Start a user search");
        tracing::info!("   GET /users/{{cursor}}  - Next page of a search");
        tracing::info!("   GET /health          - Health check");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("Shutting down, closing {} cursor(s)", self.pool.len());
        self.pool.close().await
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
