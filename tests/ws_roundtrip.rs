use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use latency_lab::client::{ConnectOptions, ProbeConnection};
use latency_lab::config::ServerConfig;
use latency_lab::prober::SAMPLES_PER_RUN;
use latency_lab::{server, AppState};

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = AppState::new(ServerConfig::default());
    let app = server::create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn options(addr: SocketAddr) -> ConnectOptions {
    let mut opts = ConnectOptions::new(format!("ws://{addr}/ws"));
    opts.echo_timeout = Duration::from_secs(2);
    opts
}

/// The server handles `logresults` asynchronously to the client's send.
async fn wait_for_result(state: &AppState, session_id: &str) -> Option<f64> {
    for _ in 0..100 {
        if let Some(avg) = state.registry.get(session_id).and_then(|r| r.latency_result) {
            return Some(avg);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn measurement_is_stored_against_the_session() {
    let (addr, state) = spawn_server().await;

    let mut opts = options(addr);
    opts.name = Some("alice".into());
    let conn = ProbeConnection::connect(&opts).await.unwrap();
    let session_id = conn.welcome().session_id.clone();
    assert_eq!(conn.welcome().user, "alice");

    let report = conn.prober().measure().await.unwrap();
    assert_eq!(report.ping_id, 10);
    assert_eq!(report.samples.len(), SAMPLES_PER_RUN);
    assert!(report.samples.iter().all(|&s| s >= 0));

    let stored = wait_for_result(&state, &session_id).await;
    assert_eq!(stored, Some(report.mean_ms));
    assert_eq!(state.registry.get(&session_id).unwrap().user, "alice");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn anonymous_clients_get_sequential_names() {
    let (addr, _state) = spawn_server().await;

    let first = ProbeConnection::connect(&options(addr)).await.unwrap();
    let second = ProbeConnection::connect(&options(addr)).await.unwrap();

    assert_eq!(first.welcome().user, "anonymous1");
    assert_eq!(second.welcome().user, "anonymous2");
    assert_ne!(first.welcome().session_id, second.welcome().session_id);
}

#[tokio::test]
async fn resumed_session_keeps_its_first_name() {
    let (addr, _state) = spawn_server().await;

    let mut opts = options(addr);
    opts.session = Some("sess_fixed".into());
    opts.name = Some("bob".into());
    let first = ProbeConnection::connect(&opts).await.unwrap();
    first.close().await.unwrap();

    opts.name = Some("mallory".into());
    let again = ProbeConnection::connect(&opts).await.unwrap();

    assert_eq!(again.welcome().session_id, "sess_fixed");
    assert_eq!(again.welcome().user, "bob");
}

#[tokio::test]
async fn reserved_characters_in_name_do_not_leak_into_the_session() {
    let (addr, state) = spawn_server().await;

    let mut victim_opts = options(addr);
    victim_opts.session = Some("victim".into());
    victim_opts.name = Some("victim".into());
    ProbeConnection::connect(&victim_opts).await.unwrap();

    let mut opts = options(addr);
    opts.name = Some("a&session=victim".into());
    let conn = ProbeConnection::connect(&opts).await.unwrap();
    assert_ne!(conn.welcome().session_id, "victim");
    assert_eq!(conn.welcome().user, "a&session=victim");

    opts.name = Some("Ann Lee".into());
    let conn = ProbeConnection::connect(&opts).await.unwrap();
    assert_eq!(conn.welcome().user, "Ann Lee");

    assert_eq!(state.registry.get("victim").unwrap().user, "victim");
}

#[tokio::test]
async fn concurrent_runs_share_one_connection() {
    let (addr, state) = spawn_server().await;

    let conn = ProbeConnection::connect(&options(addr)).await.unwrap();
    let prober = conn.prober();

    let (a, b) = tokio::join!(prober.measure(), prober.measure());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!((a.ping_id, b.ping_id), (10, 11));
    assert_eq!(a.samples.len(), SAMPLES_PER_RUN);
    assert_eq!(b.samples.len(), SAMPLES_PER_RUN);
    assert_eq!(prober.correlator().pending(), 0);

    // 2 × 5 probes echoed
    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.total_pings, 2 * SAMPLES_PER_RUN as u64);
}
