//! Ripple Server - Main entry point.
//!
//! This binary starts the Ripple social-feed backend with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`ripple_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! RIPPLE_ACCESS_TOKEN_SECRET="access-secret" \
//! RIPPLE_REFRESH_TOKEN_SECRET="refresh-secret" \
//! PORT=3001 \
//! cargo run --release --bin ripple-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use ripple_server::config::Config;
use ripple_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    init_logging();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  RIPPLE_ACCESS_TOKEN_SECRET      - Access-token signing secret");
            eprintln!("  RIPPLE_REFRESH_TOKEN_SECRET     - Refresh-token signing secret");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  RIPPLE_STORE_URL                - Storage connection string (default: mem://)");
            eprintln!("  RIPPLE_ACCESS_TOKEN_TTL_SECS    - Access validity window (default: 600)");
            eprintln!("  RIPPLE_REFRESH_TOKEN_TTL_SECS   - Refresh expiry (default: non-expiring)");
            eprintln!("  PORT                            - HTTP server port (default: 3001)");
            eprintln!("  RUST_LOG                        - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    // Log startup information
    info!(
        port = config.port,
        store_url = %config.store_url,
        access_ttl_secs = config.access_ttl.as_secs(),
        refresh_ttl_secs = config.refresh_ttl.map(|ttl| ttl.as_secs()),
        "Ripple server starting"
    );

    // Create application state (fails fast on an unknown store scheme)
    let state = match AppState::from_config(config.clone()) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to initialize storage");
            eprintln!("Error: {err}");
            return ExitCode::from(1);
        }
    };

    // Create router
    let app = create_router(state);

    // Bind to address
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(
                port = config.port,
                address = %bind_addr,
                "Server listening"
            );
            listener
        }
        Err(err) => {
            error!(
                error = %err,
                address = %bind_addr,
                "Failed to bind to address"
            );
            return ExitCode::from(1);
        }
    };

    // Start server with graceful shutdown
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    // Run the server
    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// Configures JSON-formatted output for production use with:
/// - Environment-based log level filtering via RUST_LOG
/// - Default log level of `info`
/// - Target and level information
fn init_logging() {
    // Build env filter from RUST_LOG or use default
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default: info level for our crates, warn for dependencies
        EnvFilter::new("info,tower_http=debug,axum::rejection=trace")
    });

    // JSON format layer for production logging
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    // Initialize the subscriber
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Creates a future that resolves when a shutdown signal is received.
///
/// Listens for:
/// - SIGTERM (container orchestrator shutdown)
/// - SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    info!("Waiting for in-flight requests to complete");
}
