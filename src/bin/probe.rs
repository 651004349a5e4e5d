//! Command-line latency prober.
//!
//! Connects to a `latency-lab` server, runs one or more five-sample
//! measurements and prints each run's average.

use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use tracing::{error, info};

use latency_lab::client::{ConnectOptions, ProbeConnection};
use latency_lab::config;
use latency_lab::prober::ProbeError;

#[derive(Parser, Debug)]
#[command(name = "latency-probe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket endpoint
    #[arg(long, short = 'u', env = "LATENCY_URL", default_value = "ws://127.0.0.1:3000/ws")]
    url: String,

    /// Display name to register with (first connection of a session only)
    #[arg(long, short = 'n', env = "LATENCY_NAME")]
    name: Option<String>,

    /// Resume an existing session id
    #[arg(long, short = 's', env = "LATENCY_SESSION")]
    session: Option<String>,

    /// Number of measurement runs
    #[arg(long, short = 'r', default_value = "1")]
    runs: usize,

    /// Start all runs at once on the same connection instead of one after another
    #[arg(long)]
    concurrent: bool,

    /// Give up on a run if one echo takes longer than this (ms)
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    config::init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ProbeError> {
    let opts = ConnectOptions {
        url: args.url,
        session: args.session,
        name: args.name,
        echo_timeout: Duration::from_millis(args.timeout_ms),
    };

    let conn = ProbeConnection::connect(&opts).await?;
    info!(
        "session {} as {}",
        conn.welcome().session_id,
        conn.welcome().user
    );

    let prober = conn.prober();
    let reports = if args.concurrent {
        join_all((0..args.runs).map(|_| prober.measure())).await
    } else {
        let mut reports = Vec::with_capacity(args.runs);
        for _ in 0..args.runs {
            reports.push(prober.measure().await);
        }
        reports
    };

    let mut failed = None;
    for report in reports {
        match report {
            Ok(report) => println!("[run {}] {}", report.ping_id, report.status_line()),
            Err(e) => {
                error!("run failed: {e}");
                failed = Some(e);
            }
        }
    }

    conn.close().await?;
    failed.map_or(Ok(()), Err)
}
