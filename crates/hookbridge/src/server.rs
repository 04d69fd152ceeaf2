//! The `start` subcommand: wires the Security Gate, Worker Registry,
//! Breaker Pool, Response Cache, Performance Tracker, and Dispatcher
//! into an `AppState`, serves it over Axum, and tears it down cleanly
//! on signal.

use crate::cli::config;
use hookbridge_cache::ResponseCache;
use hookbridge_dispatch::{Dispatcher, DispatcherConfig};
use hookbridge_ingress::AppState;
use hookbridge_metrics::PerformanceTracker;
use hookbridge_registry::{BreakerConfig, BreakerPool, WorkerRegistry};
use hookbridge_security::SecurityGate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CACHE_CAPACITY: usize = 10_000;
const CACHE_DEFAULT_TTL: Duration = Duration::from_secs(60);
const MAX_CONNECTIONS: usize = 256;
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let security = Arc::new(SecurityGate::from_env()?);
    let breakers = Arc::new(BreakerPool::new(BreakerConfig::default()));
    let registry = Arc::new(WorkerRegistry::new(Arc::clone(&breakers)));
    let cache = Arc::new(ResponseCache::new(CACHE_CAPACITY, CACHE_DEFAULT_TTL));
    let metrics = Arc::new(PerformanceTracker::new());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&breakers),
        Arc::clone(&cache),
        Arc::clone(&metrics),
        DispatcherConfig::default(),
    ));

    let port = port_override.unwrap_or_else(config::http_port);
    let host = config::http_host();
    let bind_addr = format!("{host}:{port}");

    let state = AppState::new(
        Arc::clone(&security),
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        Arc::clone(&metrics),
        MAX_CONNECTIONS,
        bind_addr.clone(),
    );

    let probes = registry.spawn_probes();

    let home = config::ensure_hookbridge_home()?;
    let pid_file = config::pid_file_path();
    std::fs::write(&pid_file, std::process::id().to_string())?;
    tracing::info!(pid_file = %pid_file.display(), home = %home.display(), "wrote pid file");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "hookbridge listening");

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&shutdown));

    let app = hookbridge_ingress::router(state);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown, Arc::clone(&dispatcher)));

    let result = server.await;

    probes.stop();
    let _ = std::fs::remove_file(&pid_file);

    result.map_err(anyhow::Error::from)
}

async fn wait_for_shutdown(flag: Arc<AtomicBool>, dispatcher: Arc<Dispatcher>) {
    loop {
        if flag.load(Ordering::SeqCst) {
            tracing::info!("shutdown signal received, draining connections");
            dispatcher.begin_shutdown();
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(unix)]
fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    std::thread::spawn(move || {
        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                return;
            }
        };
        if signals.forever().next().is_some() {
            flag.store(true, Ordering::SeqCst);
        }
    });
}

#[cfg(windows)]
fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    });
}
