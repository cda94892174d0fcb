mod cli;
mod logging;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use hterm_bridge::{router, BridgeState};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;

    let starter = cli.starter().context("invalid session command")?;
    let config = cli.bridge.to_config();
    info!(
        read_timeout = ?config.read_timeout,
        start_timeout = ?config.start_timeout,
        max_read_bytes = config.max_read_bytes,
        "bridge configured"
    );
    if cli.allow.is_empty() {
        info!(command = %cli.cmd, "sessions run a fixed command");
    } else {
        info!(permitted = ?cli.allow, "sessions run allow-listed commands");
    }

    let app = build_app(BridgeState::new(starter, config), &cli);

    let listener = tokio::net::TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("bind {}", cli.addr))?;
    info!("Listening on http://{}/", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP")?;
    Ok(())
}

fn build_app(state: BridgeState, cli: &Cli) -> Router {
    let app = router(state);
    let app = match &cli.static_dir {
        Some(dir) => {
            if !dir.is_dir() {
                warn!(path = %dir.display(), "static directory does not exist");
            }
            app.fallback_service(ServeDir::new(dir))
        }
        None => app,
    };
    app.layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
