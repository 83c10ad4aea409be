//! Mixtape server binary entry point.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use mixtape::{load_config, Config, Mixtape};
use mixtape_server::{build_router, AppState};

const DEFAULT_FILTER: &str = "mixtape=info,mixtape_server=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing()?;

    let mut config = match std::env::var("MIXTAPE_CONFIG") {
        Ok(path) => load_config(&path).with_context(|| format!("Failed to load {}", path))?,
        Err(_) => {
            tracing::info!("MIXTAPE_CONFIG not set, using default configuration");
            Config::default()
        }
    };
    if let Ok(port) = std::env::var("PORT") {
        config.server.bind = override_port(&config.server.bind, &port)?;
    }

    let bind = config.server.bind.clone();
    let mixtape = Mixtape::from_config(config).context("Failed to start mixtape service")?;

    let shutdown = CancellationToken::new();
    let reaper = mixtape.spawn_reaper(shutdown.clone());
    let app = build_router(AppState::new(mixtape, shutdown.clone()));

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Mixtape server listening on http://{}", listener.local_addr()?);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Mixtape server shutting down...");
            signal.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!("Reaper task ended abnormally: {}", e);
    }
    Ok(())
}

/// Install the tracing subscriber and route `log` records into it.
///
/// `RUST_LOG` overrides the default filter; `MIXTAPE_LOG_JSON=1` switches to
/// JSON lines.
fn init_tracing() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("MIXTAPE_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))?;
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))?;
    }
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn override_port(bind: &str, port: &str) -> anyhow::Result<String> {
    let port: u16 = port.parse().with_context(|| format!("Invalid PORT '{}'", port))?;
    let mut addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;
    addr.set_port(port);
    Ok(addr.to_string())
}
