//! sc-server: the stillcast HTTP service.
//!
//! This crate ties the core and media crates into a running server. It
//! provides:
//!
//! - The conversion [`Coordinator`](conversion::Coordinator) and its stage
//!   seams
//! - The [`DownloadRegistry`](downloads::DownloadRegistry) of finished outputs
//!   and its expiry sweeper
//! - The Axum router with upload, download, health and tool routes
//! - Graceful shutdown via signal handling

pub mod context;
pub mod conversion;
pub mod downloads;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use sc_av::ToolRegistry;
use sc_core::config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use context::AppContext;

/// Start the stillcast server.
///
/// Builds the [`AppContext`] from `config`, binds the configured address and
/// serves until a shutdown signal arrives.
pub async fn start(config: Config) -> sc_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let static_dir = &config.server.static_dir;
    if !static_dir.exists() {
        match std::fs::create_dir_all(static_dir) {
            Ok(()) => tracing::info!("Created static directory {}", static_dir.display()),
            Err(e) => tracing::warn!(
                "Failed to create static directory {}: {e}",
                static_dir.display()
            ),
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| sc_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let ctx = AppContext::from_config(config)?;
    log_tool_status(ctx.tools.clone()).await;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| sc_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    serve(listener, ctx, CancellationToken::new()).await
}

/// Serve `ctx` on an already bound listener until a shutdown signal arrives
/// or `cancel` fires.
///
/// Runs the download sweeper alongside the server and releases every
/// unclaimed output on the way out.
pub async fn serve(
    listener: TcpListener,
    ctx: AppContext,
    cancel: CancellationToken,
) -> sc_core::Result<()> {
    let sweeper = downloads::start_sweeper(
        ctx.downloads.clone(),
        ctx.config.downloads.sweep_interval(),
        cancel.clone(),
    );

    let app = router::build_router(ctx.clone());
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Stop background tasks.
    cancel.cancel();
    let _ = sweeper.await;
    ctx.downloads.release_all();

    tracing::info!("Server shutdown complete");
    result.map_err(|source| sc_core::Error::Io { source })
}

/// Log which external tools were found. `check_all` runs `-version`
/// synchronously, so it stays off the async workers.
async fn log_tool_status(tools: Arc<ToolRegistry>) {
    let infos = match tokio::task::spawn_blocking(move || tools.check_all()).await {
        Ok(infos) => infos,
        Err(e) => {
            tracing::warn!("Tool check failed: {e}");
            return;
        }
    };

    for info in infos {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; conversions will fail", info.name);
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
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
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
