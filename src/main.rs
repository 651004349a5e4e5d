use clap::Parser;
use tracing::{error, info};

use latency_lab::config::{self, ServerConfig};
use latency_lab::{server, AppState};

#[tokio::main]
async fn main() {
    let config = ServerConfig::parse();
    config::init_logging(&config.log_level);

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   📡  ROUND-TRIP LATENCY LAB                     ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    let addr = config.bind;
    let state = AppState::new(config);
    let app = server::create_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("listening on http://{addr}");
    info!("probe socket  → ws://{addr}/ws");
    info!("registry      → http://{addr}/api/users");
    info!("metrics SSE   → http://{addr}/api/metrics/stream");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("could not install Ctrl-C handler: {e}");
        }
        info!("shutdown signal received");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
