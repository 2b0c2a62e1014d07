// src/main.rs
//
// Telemetry gateway entry point: loads configuration and the signal catalog,
// connects the persistence sink, spawns the hub and pipeline, binds both
// WebSocket listeners, and runs until interrupted. Shutdown flushes the
// partial cell aggregate and closes subscriber connections.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use telemd::dispatch::{spawn_pipeline, Publisher};
use telemd::sink::PostgresSink;
use telemd::throttle::Throttle;
use telemd::tlog;
use telemd::{hub, server, Catalog, Settings};

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("telemd.toml"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::load(&config_path()) {
        Ok(s) => s,
        Err(e) => {
            tlog!("[main] {}", e);
            return ExitCode::FAILURE;
        }
    };

    if !settings.log_dir.is_empty() {
        if let Err(e) = telemd::logging::init_file_logging(Path::new(&settings.log_dir)) {
            tlog!("[main] {}", e);
        }
    }

    let catalog = match Catalog::load(Path::new(&settings.catalog_path)) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tlog!("[main] {}", e);
            return ExitCode::FAILURE;
        }
    };
    tlog!("[main] loaded {} message definitions", catalog.len());

    let (sink, _sink_task) = match PostgresSink::connect(&settings.database).await {
        Ok(pair) => pair,
        Err(e) => {
            tlog!("[main] {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (hub_handle, _hub_task) = hub::spawn();
    let throttle = Arc::new(Throttle::new(settings.throttle_interval_ms));
    let publisher = Publisher::new(throttle, hub_handle.clone());
    let (frames, pipeline) = spawn_pipeline(catalog.clone(), Arc::new(sink), publisher);

    let ingest_addr = format!(
        "{}:{}",
        settings.server.bind_address, settings.server.ingest_port
    );
    let ingest = match TcpListener::bind(&ingest_addr).await {
        Ok(l) => l,
        Err(e) => {
            tlog!("[main] bind {}: {}", ingest_addr, e);
            return ExitCode::FAILURE;
        }
    };
    tlog!("[main] ingest listening on {} ({:?} mode)", ingest_addr, settings.mode);

    let live_addr = format!(
        "{}:{}",
        settings.server.bind_address, settings.server.live_port
    );
    let live = match TcpListener::bind(&live_addr).await {
        Ok(l) => l,
        Err(e) => {
            tlog!("[main] bind {}: {}", live_addr, e);
            return ExitCode::FAILURE;
        }
    };
    tlog!("[main] live broadcast listening on {}", live_addr);

    let stop = Arc::new(AtomicBool::new(false));
    let ingest_task = tokio::spawn(server::run_ingest_listener(
        ingest,
        settings.mode,
        catalog,
        frames,
        stop.clone(),
    ));
    let live_task = tokio::spawn(server::run_live_listener(live, hub_handle.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tlog!("[main] signal error: {}", e);
    }
    tlog!("[main] shutting down");

    // Stop accepting and signal open ingest connections to wind down. Once
    // the last pipeline sender drops, the pipeline flushes the cell
    // aggregator and ends.
    stop.store(true, Ordering::SeqCst);
    ingest_task.abort();
    live_task.abort();
    pipeline.await.ok();

    hub_handle.shutdown().await;
    telemd::logging::stop_file_logging();
    ExitCode::SUCCESS
}
