//! Federated Memory MCP Server
//!
//! Multi-user memory for LLM clients over the Model Context Protocol:
//! topical memory modules with full-resolution vector search, a compressed
//! central index for federated routing, and per-session authentication with
//! public/private tool gating.
//!
//! Transports:
//! - Streamable HTTP on `/mcp` (session id header, SSE or JSON responses)
//! - Token-in-URL SSE on `/{token}/sse` + `/{token}/messages`

use std::io;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tower_http::cors::CorsLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use fedmem_mcp::config::ServerConfig;
use fedmem_mcp::protocol::{http, sse};
use fedmem_mcp::session::SessionManager;
use fedmem_mcp::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Streamable HTTP only
    Http,
    /// Token-in-URL SSE only
    Sse,
    /// Both transports on one listener
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "fedmem-mcp", version, about = "Federated memory MCP server")]
struct Cli {
    /// Bind address (overrides FEDMEM_BIND_ADDR)
    #[arg(long)]
    addr: Option<String>,

    /// Which transports to serve
    #[arg(long, value_enum, default_value_t = Transport::Both)]
    transport: Transport,

    /// SQLite database path (overrides DATABASE_URL)
    #[arg(long)]
    database: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Log to stderr; stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let mut config = ServerConfig::from_env();
    if let Some(addr) = cli.addr {
        config.bind_addr = addr;
    }
    if let Some(database) = cli.database {
        config.database_path = Some(database);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.bind_addr,
        transport = ?cli.transport,
        "starting federated-memory MCP server"
    );

    let state = AppState::bootstrap(config).context("bootstrapping application state")?;
    let sessions = SessionManager::new(state.clone());
    let sweeper = sessions.spawn_idle_sweeper();

    // Startup integrity sweep: restore index coverage after any interrupted
    // write-through from a previous run.
    {
        let state = state.clone();
        tokio::task::spawn_blocking(move || match state.router.reindex() {
            Ok(report) => {
                if report.orphans_removed > 0 {
                    info!(
                        orphans = report.orphans_removed,
                        "startup reindex removed orphaned index entries"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "startup reindex failed"),
        });
    }

    let app = match cli.transport {
        Transport::Http => http::router(state.clone(), sessions.clone()),
        Transport::Sse => sse::router(state.clone(), sessions.clone()),
        Transport::Both => http::router(state.clone(), sessions.clone())
            .merge(sse::router(state.clone(), sessions.clone())),
    }
    .layer(CorsLayer::permissive())
    .layer(tower::limit::ConcurrencyLimitLayer::new(256));

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("binding {}", state.config.bind_addr))?;
    info!(addr = %state.config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    info!("federated-memory MCP server shut down");
    Ok(())
}

/// Graceful shutdown on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
