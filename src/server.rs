// src/server.rs
//
// WebSocket listeners.
//
// Ingest side: one connection task per inbound sender; each text message is
// parsed per the configured mode (live hex packet or CSV row) and forwarded
// into the pipeline channel. Malformed messages are skipped.
//
// Live side: one connection task per subscriber; registers with the hub, a
// writer task drains the subscriber queue into binary WebSocket messages,
// and the reader drains client traffic until failure/close, then
// unregisters.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::catalog::Catalog;
use crate::decoder::{parse_csv_row, parse_live_packet, RawFrame};
use crate::hub::HubHandle;
use crate::settings::IngestMode;
use crate::tlog;

// ============================================================================
// Ingest Listener
// ============================================================================

/// Accept inbound telemetry senders and feed their frames to the pipeline.
/// Connection tasks watch `stop` so shutdown releases their pipeline senders.
pub async fn run_ingest_listener(
    listener: TcpListener,
    mode: IngestMode,
    catalog: Arc<Catalog>,
    frames: mpsc::Sender<RawFrame>,
    stop: Arc<AtomicBool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_ingest(
                    stream,
                    addr.to_string(),
                    mode,
                    catalog.clone(),
                    frames.clone(),
                    stop.clone(),
                ));
            }
            Err(e) => {
                tlog!("[ingest] accept error: {}", e);
            }
        }
    }
}

async fn handle_ingest(
    stream: TcpStream,
    peer: String,
    mode: IngestMode,
    catalog: Arc<Catalog>,
    frames: mpsc::Sender<RawFrame>,
    stop: Arc<AtomicBool>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tlog!("[ingest] {} upgrade error: {}", peer, e);
            return;
        }
    };
    tlog!("[ingest] {} connected ({:?} mode)", peer, mode);

    let (_write, mut read) = ws.split();
    while !stop.load(Ordering::SeqCst) {
        // Read with timeout so the stop flag is rechecked periodically
        let msg = match tokio::time::timeout(Duration::from_millis(250), read.next()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(Err(_))) => break,
            Ok(Some(Ok(m))) => m,
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.into_text() else { continue };

        let frame = match mode {
            IngestMode::Live => parse_live_packet(&text),
            IngestMode::Csv => parse_csv_row(&text, &catalog),
        };
        // Malformed units are skipped; a closed pipeline ends the connection
        if let Some(frame) = frame {
            if frames.send(frame).await.is_err() {
                break;
            }
        }
    }

    tlog!("[ingest] {} disconnected", peer);
}

// ============================================================================
// Live (subscriber) Listener
// ============================================================================

/// Accept subscriber connections and wire them to the broadcast hub.
pub async fn run_live_listener(listener: TcpListener, hub: HubHandle) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_subscriber(stream, addr.to_string(), hub.clone()));
            }
            Err(e) => {
                tlog!("[live] accept error: {}", e);
            }
        }
    }
}

async fn handle_subscriber(stream: TcpStream, peer: String, hub: HubHandle) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tlog!("[live] {} upgrade error: {}", peer, e);
            return;
        }
    };

    let (mut write, mut read) = ws.split();
    let (id, mut queue) = hub.register().await;

    // Writer: drain the subscriber queue into binary frames. Ends when the
    // hub drops the subscriber or the socket fails.
    tokio::spawn(async move {
        while let Some(bytes) = queue.recv().await {
            if write.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    // Reader: subscribers send nothing meaningful; drain until close/failure
    while let Some(msg) = read.next().await {
        if msg.is_err() {
            break;
        }
    }
    hub.unregister(id).await;
}

// ============================================================================
// Tests
// ============================================================================
