use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Round-trip latency server: echoes probes, keeps per-session results.
#[derive(Parser, Debug, Clone)]
#[command(name = "latency-lab")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "LATENCY_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Directory served for every path that is not an API route
    #[arg(long, env = "LATENCY_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, short = 'l', default_value = "info")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            static_dir: PathBuf::from("static"),
            log_level: "info".into(),
        }
    }
}

/// Installs the global `tracing` subscriber.
pub fn init_logging(level: &str) {
    let filter = format!("latency_lab={level},latency_probe={level},tower_http=warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}
