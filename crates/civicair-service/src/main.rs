//! civicair service - AQI grid API with background refresh.
//!
//! Run with: `cargo run -p civicair-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use civicair_core::OpenWeatherClient;
use civicair_service::{AppState, Config, Refresher, api};
use civicair_store::Store;

/// civicair service - AQI grid API with background refresh.
#[derive(Parser, Debug)]
#[command(name = "civicair-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the background refresh sweep (API only mode).
    #[arg(long)]
    no_refresher: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("civicair_service=info".parse()?)
                .add_directive("civicair_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env();

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    let provider = OpenWeatherClient::new(
        &config.provider.base_url,
        &config.provider.api_key,
        config.provider.timeout(),
    )?;
    info!("Using AQI provider at {}", provider.endpoint());

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let addr: SocketAddr = config.server.bind.parse()?;
    let refresh_enabled = config.refresh.enabled && !args.no_refresher;

    let state = AppState::new(store, config, Arc::new(provider));

    if refresh_enabled {
        Refresher::new(Arc::clone(&state)).start().await;
    } else {
        info!("Background refresher disabled");
    }

    let app = Router::new()
        .merge(api::router())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(Arc::clone(&state));

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.refresher.signal_stop();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
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
